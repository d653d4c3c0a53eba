#![forbid(unsafe_code)]

//! `kithara-storage`
//!
//! Disk primitives for Kithara.
//!
//! - [`AtomicFile`]: whole-object read/write with crash-safe replacement (temp file + rename)
//! - [`DirLock`]: exclusive, non-blocking ownership of a directory for the guard's lifetime

mod atomic;
mod error;
mod lock;

pub use atomic::AtomicFile;
pub use error::{StorageError, StorageResult};
pub use lock::DirLock;
