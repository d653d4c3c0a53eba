#![forbid(unsafe_code)]

//! `kithara-cache`
//!
//! Disk-backed cache of byte ranges for named content.
//!
//! - [`SimpleCache`]: the [`Cache`] implementation over one locked directory
//! - [`CachedContentIndex`]: persistent key → id + metadata index, optionally AES encrypted
//! - [`CacheEvictor`]: eviction policy ([`NoOpCacheEvictor`], [`LeastRecentlyUsedCacheEvictor`])
//! - [`CachedRegionTracker`]: cached byte regions mapped onto media time via a [`ChunkIndex`]

mod builder;
mod cache;
mod content;
mod error;
mod evict;
mod index;
mod listener;
mod metadata;
mod region;
mod simple;
mod span;
mod uid;

pub use builder::{CacheOptions, SimpleCacheBuilder};
pub use cache::Cache;
pub use content::CachedContent;
pub use error::{CacheError, CacheResult};
pub use evict::{CacheEvictor, EvictionTarget, LeastRecentlyUsedCacheEvictor, NoOpCacheEvictor};
pub use index::{
    CachedContentIndex, ContentRecord, FileIndexStorage, INDEX_FILE_NAME, IndexStorage, SecretKey,
};
pub use listener::CacheListener;
pub use metadata::{CONTENT_LENGTH, ContentMetadata, ContentMetadataMutations, REDIRECTED_URI};
pub use region::{CachedRegionTracker, Chunk, ChunkIndex, RegionEnd};
pub use simple::{LOCK_FILE_NAME, SimpleCache};
pub use span::{CacheSpan, SpanFileName, parse_span_file_name, span_file_name};
