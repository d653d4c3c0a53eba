#![forbid(unsafe_code)]

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    error::CacheResult,
    listener::CacheListener,
    metadata::{ContentMetadata, ContentMetadataMutations},
    span::CacheSpan,
};

/// A byte-range cache for named content.
///
/// ## Write workflow
/// 1. `start_read_write*` returns either a cached span (read it) or a hole
///    reserved for the caller.
/// 2. For a hole: `start_file` returns a path, the caller writes bytes there,
///    `commit_file` registers them as a cached span. Repeat as data arrives.
/// 3. `release_hole_span` gives the reservation back.
///
/// ## Normative
/// - At most one hole overlaps any byte range of a key at a time.
/// - Persistence failures are returned, but the in-memory state is already
///   updated when they are.
/// - After [`release`](Self::release) every call except `uid` returns
///   [`CacheError::Released`](crate::CacheError::Released).
pub trait Cache: Send + Sync {
    /// Random id of the cache directory, `None` if the cache failed to
    /// initialize.
    fn uid(&self) -> Option<u64>;

    /// Persist the index, unlock the directory and disable the instance.
    fn release(&self) -> CacheResult<()>;

    /// Subscribe to span events of `key`.
    ///
    /// The listener first gets `on_span_added` for every span already cached,
    /// under the same lock as the registration; those spans are also returned.
    fn add_listener(&self, key: &str, listener: Arc<dyn CacheListener>)
    -> CacheResult<Vec<CacheSpan>>;

    fn remove_listener(&self, key: &str, listener: &Arc<dyn CacheListener>);

    /// Cached spans of `key` in position order.
    fn cached_spans(&self, key: &str) -> CacheResult<Vec<CacheSpan>>;

    fn keys(&self) -> CacheResult<Vec<String>>;

    /// Total bytes of all cached spans.
    fn cache_space(&self) -> CacheResult<u64>;

    /// Blocks while the requested range overlaps a hole held by someone else.
    fn start_read_write(
        &self,
        key: &str,
        position: u64,
        length: Option<u64>,
    ) -> CacheResult<CacheSpan>;

    /// `Ok(None)` when the requested range overlaps a hole held by someone else.
    fn start_read_write_non_blocking(
        &self,
        key: &str,
        position: u64,
        length: Option<u64>,
    ) -> CacheResult<Option<CacheSpan>>;

    /// Path to write `[position, position + length)` to. The range must be
    /// covered by a hole the caller holds.
    fn start_file(&self, key: &str, position: u64, length: Option<u64>) -> CacheResult<PathBuf>;

    /// Register `length` bytes written to `file` as a cached span.
    fn commit_file(&self, file: &Path, length: u64) -> CacheResult<()>;

    fn release_hole_span(&self, hole: &CacheSpan) -> CacheResult<()>;

    /// Remove every span of `key` and the key's metadata.
    fn remove_resource(&self, key: &str) -> CacheResult<()>;

    fn remove_span(&self, span: &CacheSpan) -> CacheResult<()>;

    fn is_cached(&self, key: &str, position: u64, length: u64) -> CacheResult<bool>;

    /// Contiguous cached bytes from `position` (capped at `length`), or the
    /// negated size of the gap in front of the next cached byte.
    fn cached_length(&self, key: &str, position: u64, length: u64) -> CacheResult<i64>;

    /// Cached bytes inside the range, gaps skipped.
    fn cached_bytes(&self, key: &str, position: u64, length: Option<u64>) -> CacheResult<u64>;

    fn apply_content_metadata_mutations(
        &self,
        key: &str,
        mutations: &ContentMetadataMutations,
    ) -> CacheResult<()>;

    fn content_metadata(&self, key: &str) -> CacheResult<ContentMetadata>;
}
