#![forbid(unsafe_code)]

//! Crash-safe whole-file storage.
//!
//! [`AtomicFile`] reads and writes a small file as a single object.
//! [`write_all()`](AtomicFile::write_all) goes through the write-temp → rename
//! pattern: the data is written to a uniquely-named temp file (via the
//! `tempfile` crate) in the same directory and then renamed over the target,
//! so readers observe either the old content or the new content, never a
//! partial write.

use std::{
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use crate::{StorageError, StorageResult};

/// Small-object file addressed by path with atomic replacement.
#[derive(Clone, Debug)]
pub struct AtomicFile {
    path: PathBuf,
}

impl AtomicFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the whole file into `buf` (cleared first).
    ///
    /// A missing file reads as empty and returns `0`.
    pub fn read_into(&self, buf: &mut Vec<u8>) -> StorageResult<usize> {
        buf.clear();
        let mut file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let n = file.read_to_end(buf)?;
        Ok(n)
    }

    /// Atomically replace the file content with `data`.
    pub fn write_all(&self, data: &[u8]) -> StorageResult<()> {
        // Temp file lives next to the target: same filesystem, so rename is atomic.
        let parent = self
            .path
            .parent()
            .ok_or_else(|| StorageError::Failed("atomic write: no parent dir".to_string()))?;
        std::fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| StorageError::Failed(format!("atomic write tmpfile: {e}")))?;

        tmp.write_all(data)
            .map_err(|e| StorageError::Failed(format!("atomic write: {e}")))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StorageError::Failed(format!("atomic write sync: {e}")))?;

        // `persist()` renames over the target and disarms the auto-delete on drop.
        tmp.persist(&self.path)
            .map_err(|e| StorageError::Failed(format!("atomic rename: {e}")))?;

        tracing::trace!(path = ?self.path, bytes = data.len(), "atomic write committed");
        Ok(())
    }

    /// Delete the file. A missing file is not an error.
    pub fn delete(&self) -> StorageResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
