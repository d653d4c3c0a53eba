#![forbid(unsafe_code)]

use std::path::PathBuf;

use crate::{
    error::CacheResult,
    evict::{CacheEvictor, LeastRecentlyUsedCacheEvictor, NoOpCacheEvictor},
    index::{FileIndexStorage, IndexStorage, SecretKey},
    simple::SimpleCache,
};

/// Plain cache configuration, for callers that don't need custom evictors or
/// index storage.
#[derive(Clone, Debug)]
pub struct CacheOptions {
    /// Directory owned by the cache.
    pub cache_dir: PathBuf,
    /// Byte budget; `None` disables eviction.
    pub max_bytes: Option<u64>,
    /// Key for reading (and, with `encrypt`, writing) an encrypted index.
    pub secret_key: Option<SecretKey>,
    pub encrypt: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("kithara-cache"))
    }
}

impl CacheOptions {
    pub fn new<P: Into<PathBuf>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            max_bytes: None,
            secret_key: None,
            encrypt: false,
        }
    }

    #[must_use]
    pub fn with_max_bytes(mut self, max: u64) -> Self {
        self.max_bytes = Some(max);
        self
    }

    /// Encrypt the index with `key`.
    #[must_use]
    pub fn with_secret_key(mut self, key: SecretKey) -> Self {
        self.secret_key = Some(key);
        self.encrypt = true;
        self
    }

    #[must_use]
    pub fn with_encryption(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }
}

/// Constructor for [`SimpleCache`].
///
/// ```ignore
/// let cache = SimpleCacheBuilder::new()
///     .cache_dir("/path/to/cache")
///     .evictor(LeastRecentlyUsedCacheEvictor::new(64 << 20))
///     .secret_key(key)
///     .build()?;
/// ```
#[derive(Default)]
pub struct SimpleCacheBuilder {
    cache_dir: Option<PathBuf>,
    evictor: Option<Box<dyn CacheEvictor>>,
    secret_key: Option<SecretKey>,
    encrypt: bool,
    index_storage: Option<Box<dyn IndexStorage>>,
}

impl SimpleCacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_options(options: &CacheOptions) -> Self {
        let evictor: Box<dyn CacheEvictor> = match options.max_bytes {
            Some(max) => Box::new(LeastRecentlyUsedCacheEvictor::new(max)),
            None => Box::new(NoOpCacheEvictor),
        };
        Self {
            cache_dir: Some(options.cache_dir.clone()),
            evictor: Some(evictor),
            secret_key: options.secret_key,
            encrypt: options.encrypt,
            index_storage: None,
        }
    }

    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn evictor(mut self, evictor: impl CacheEvictor + 'static) -> Self {
        self.evictor = Some(Box::new(evictor));
        self
    }

    /// Read and write an encrypted index.
    #[must_use]
    pub fn secret_key(mut self, key: SecretKey) -> Self {
        self.secret_key = Some(key);
        self.encrypt = true;
        self
    }

    /// Whether index writes are encrypted; reading an encrypted index only
    /// needs the key.
    #[must_use]
    pub fn encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    /// Replace the default `content_index.bin` storage. Key settings are
    /// ignored when a custom storage is given.
    #[must_use]
    pub fn index_storage(mut self, storage: impl IndexStorage + 'static) -> Self {
        self.index_storage = Some(Box::new(storage));
        self
    }

    pub fn build(self) -> CacheResult<SimpleCache> {
        let cache_dir = self
            .cache_dir
            .unwrap_or_else(|| CacheOptions::default().cache_dir);
        let evictor: Box<dyn CacheEvictor> = self
            .evictor
            .unwrap_or_else(|| Box::new(NoOpCacheEvictor));
        let index_storage: Box<dyn IndexStorage> = match self.index_storage {
            Some(storage) => storage,
            None => Box::new(FileIndexStorage::new(
                &cache_dir,
                self.secret_key,
                self.encrypt,
            )?),
        };
        SimpleCache::open(cache_dir, evictor, index_storage)
    }
}
