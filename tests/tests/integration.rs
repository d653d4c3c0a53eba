//! All integration tests for kithara
#![expect(
    clippy::unwrap_used,
    reason = "unwraps are fine in tests"
)]

mod common;
mod kithara_storage;
