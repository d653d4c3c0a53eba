// Common fixtures and utilities for integration tests


pub use fixtures::*;
