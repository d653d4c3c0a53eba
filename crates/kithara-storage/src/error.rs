#![forbid(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

/// Result type used by `kithara-storage`.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors produced by storage primitives.
///
/// Higher-level crates wrap this error to add domain context (content key, span, etc.).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage failed: {0}")]
    Failed(String),

    #[error("directory is locked by another owner: {}", path.display())]
    Locked { path: PathBuf },
}
