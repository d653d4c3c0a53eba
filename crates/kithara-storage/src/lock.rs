#![forbid(unsafe_code)]

//! Exclusive directory ownership.
//!
//! [`DirLock`] holds an OS-level exclusive lock on a lock file inside a
//! directory for as long as the guard lives. A second owner (same process or
//! another one) trying to lock the same directory fails immediately with
//! [`StorageError::Locked`] instead of waiting.

use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use fs4::fs_std::FileExt;

use crate::{StorageError, StorageResult};

/// RAII guard for an exclusively locked directory.
///
/// The lock is released when the guard is dropped (closing the file drops the lock).
#[derive(Debug)]
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Lock `dir` through the lock file `file_name` inside it.
    ///
    /// The directory must exist. Never blocks.
    pub fn acquire(dir: &Path, file_name: &str) -> StorageResult<Self> {
        let path = dir.join(file_name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if !file.try_lock_exclusive()? {
            return Err(StorageError::Locked {
                path: dir.to_path_buf(),
            });
        }

        tracing::debug!(path = ?path, "directory lock acquired");
        Ok(Self { file, path })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock explicitly.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = ?self.path, error = %e, "failed to unlock directory");
        } else {
            tracing::debug!(path = ?self.path, "directory lock released");
        }
    }
}
