#![forbid(unsafe_code)]

use std::path::PathBuf;

use kithara_storage::StorageError;
use thiserror::Error;

/// Span cache errors.
///
/// Persistence failures (`Storage`, `Io`, `Encode`) never roll back in-memory state:
/// by the time one of them is returned, the logical cache state already reflects the
/// requested mutation.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("index encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("index decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("corrupt content index: {0}")]
    CorruptIndex(String),

    #[error("content index crypto error: {0}")]
    Crypto(String),

    #[error("cache directory is in use by another instance: {}", dir.display())]
    Locked { dir: PathBuf },

    #[error("cache initialization failed: {0}")]
    Initialization(String),

    #[error("cache has been released")]
    Released,

    #[error("range is not locked by a hole: key={key} position={position}")]
    NotLocked { key: String, position: u64 },

    #[error("not a span file: {}", path.display())]
    InvalidSpanFile { path: PathBuf },

    #[error("span {position}+{length} exceeds content length {content_length} for key={key}")]
    ContentLengthExceeded {
        key: String,
        position: u64,
        length: u64,
        content_length: u64,
    },

    #[error("unknown content key: {0}")]
    UnknownKey(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
