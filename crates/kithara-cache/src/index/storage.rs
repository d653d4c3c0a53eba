#![forbid(unsafe_code)]

//! Persistence backends for [`CachedContentIndex`](super::CachedContentIndex).
//!
//! ## File format (`content_index.bin`)
//! ```text
//! u32 BE  version (= 2)
//! u32 BE  flags   (bit 0: encrypted)
//! [16]    IV      (encrypted only)
//! ...     body    = bincode(records) ++ sha256(bincode(records))
//!                   AES-128-CBC/PKCS7 encrypted when flagged
//! ```
//! Anything that doesn't match exactly (unknown version, short file, digest
//! mismatch, failed decryption) is reported as an error; the index decides how
//! to recover.

use std::path::Path;

use kithara_storage::AtomicFile;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::cipher::{self, IV_LEN, SecretKey};
use crate::{
    error::{CacheError, CacheResult},
    metadata::ContentMetadata,
};

pub const INDEX_FILE_NAME: &str = "content_index.bin";

const VERSION: u32 = 2;
const FLAG_ENCRYPTED: u32 = 1;
const HEADER_LEN: usize = 8;
const DIGEST_LEN: usize = 32;

/// One persisted content entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: u32,
    pub key: String,
    pub metadata: ContentMetadata,
}

/// Where the content index lives.
pub trait IndexStorage: Send {
    fn exists(&self) -> bool;

    /// Read all records. A missing index loads as empty.
    fn load(&mut self) -> CacheResult<Vec<ContentRecord>>;

    /// Replace the persisted index with `records`.
    fn store(&mut self, records: &[ContentRecord]) -> CacheResult<()>;

    fn delete(&mut self) -> CacheResult<()>;
}

/// Single-file index storage with optional AES encryption.
#[derive(Debug)]
pub struct FileIndexStorage {
    file: AtomicFile,
    secret_key: Option<SecretKey>,
    encrypt: bool,
}

impl FileIndexStorage {
    /// Index stored at `<dir>/content_index.bin`.
    ///
    /// With a `secret_key`, encrypted indexes can be read; `encrypt` decides
    /// whether writes are encrypted too.
    pub fn new(dir: &Path, secret_key: Option<SecretKey>, encrypt: bool) -> CacheResult<Self> {
        if encrypt && secret_key.is_none() {
            return Err(CacheError::Crypto(
                "index encryption requires a secret key".to_string(),
            ));
        }
        Ok(Self {
            file: AtomicFile::new(dir.join(INDEX_FILE_NAME)),
            secret_key,
            encrypt,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    fn encode(&self, records: &[ContentRecord]) -> CacheResult<Vec<u8>> {
        let mut body = bincode::serde::encode_to_vec(records, bincode::config::legacy())?;
        let digest = Sha256::digest(&body);
        body.extend_from_slice(&digest);

        let mut out = Vec::with_capacity(HEADER_LEN + IV_LEN + body.len() + 16);
        out.extend_from_slice(&VERSION.to_be_bytes());
        match (self.encrypt, self.secret_key.as_ref()) {
            (true, Some(key)) => {
                let iv = cipher::random_iv();
                out.extend_from_slice(&FLAG_ENCRYPTED.to_be_bytes());
                out.extend_from_slice(&iv);
                out.extend_from_slice(&cipher::encrypt(key, &iv, &body));
            }
            _ => {
                out.extend_from_slice(&0u32.to_be_bytes());
                out.extend_from_slice(&body);
            }
        }
        Ok(out)
    }

    fn decode(&self, buf: &[u8]) -> CacheResult<Vec<ContentRecord>> {
        let version = read_u32(buf, 0)?;
        if version != VERSION {
            return Err(CacheError::CorruptIndex(format!(
                "unsupported index version {version}"
            )));
        }
        let flags = read_u32(buf, 4)?;
        let rest = &buf[HEADER_LEN..];

        let body = if flags & FLAG_ENCRYPTED != 0 {
            let key = self.secret_key.as_ref().ok_or_else(|| {
                CacheError::Crypto("index is encrypted but no secret key is configured".to_string())
            })?;
            if rest.len() < IV_LEN {
                return Err(CacheError::CorruptIndex("truncated index iv".to_string()));
            }
            let (iv, ciphertext) = rest.split_at(IV_LEN);
            let iv: [u8; IV_LEN] = iv
                .try_into()
                .map_err(|_| CacheError::CorruptIndex("bad index iv".to_string()))?;
            cipher::decrypt(key, &iv, ciphertext)?
        } else {
            rest.to_vec()
        };

        if body.len() < DIGEST_LEN {
            return Err(CacheError::CorruptIndex("truncated index body".to_string()));
        }
        let (payload, digest) = body.split_at(body.len() - DIGEST_LEN);
        if Sha256::digest(payload).as_slice() != digest {
            return Err(CacheError::CorruptIndex("index digest mismatch".to_string()));
        }

        let (records, _) =
            bincode::serde::decode_from_slice::<Vec<ContentRecord>, _>(payload, bincode::config::legacy())?;
        Ok(records)
    }
}

impl IndexStorage for FileIndexStorage {
    fn exists(&self) -> bool {
        self.file.exists()
    }

    fn load(&mut self) -> CacheResult<Vec<ContentRecord>> {
        let mut buf = Vec::new();
        if self.file.read_into(&mut buf)? == 0 {
            return Ok(Vec::new());
        }
        self.decode(&buf)
    }

    fn store(&mut self, records: &[ContentRecord]) -> CacheResult<()> {
        let bytes = self.encode(records)?;
        self.file.write_all(&bytes)?;
        tracing::trace!(
            path = ?self.file.path(),
            entries = records.len(),
            encrypted = self.encrypt,
            "content index stored"
        );
        Ok(())
    }

    fn delete(&mut self) -> CacheResult<()> {
        self.file.delete()?;
        Ok(())
    }
}

fn read_u32(buf: &[u8], at: usize) -> CacheResult<u32> {
    buf.get(at..at + 4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| CacheError::CorruptIndex("truncated index header".to_string()))
}
