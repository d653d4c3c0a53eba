#![forbid(unsafe_code)]

use std::{ops::Range, sync::Arc};

use parking_lot::Mutex;
use rangemap::RangeSet;

use super::chunk_index::ChunkIndex;
use crate::{cache::Cache, error::CacheResult, listener::CacheListener, span::CacheSpan};

/// How far cached data reaches from a queried position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionEnd {
    NotCached,
    /// Cached through the end of the last chunk.
    CachedToEnd,
    /// Cached data stops at this media time.
    EndsAt { time_ms: u64 },
}

/// Tracks which byte regions of one content key are cached and answers
/// "until what media time is playback covered from here".
///
/// Regions are kept as a coalesced range set: adjacent or overlapping spans
/// merge into one region, removing bytes from the middle of a region splits it.
#[derive(Debug)]
pub struct CachedRegionTracker {
    key: String,
    chunk_index: ChunkIndex,
    regions: Mutex<RangeSet<u64>>,
}

impl CachedRegionTracker {
    /// A detached tracker; feed it through [`CacheListener`].
    pub fn new(key: impl Into<String>, chunk_index: ChunkIndex) -> Self {
        Self {
            key: key.into(),
            chunk_index,
            regions: Mutex::new(RangeSet::new()),
        }
    }

    /// Subscribe a new tracker to `key` on `cache`, seeded with the spans
    /// already cached.
    pub fn attach(
        cache: &dyn Cache,
        key: impl Into<String>,
        chunk_index: ChunkIndex,
    ) -> CacheResult<Arc<Self>> {
        let tracker = Arc::new(Self::new(key, chunk_index));
        let listener: Arc<dyn CacheListener> = Arc::clone(&tracker) as Arc<dyn CacheListener>;
        let spans = cache.add_listener(&tracker.key, listener)?;
        tracing::debug!(key = %tracker.key, spans = spans.len(), "region tracker attached");
        Ok(tracker)
    }

    pub fn detach(self: &Arc<Self>, cache: &dyn Cache) {
        let listener: Arc<dyn CacheListener> = Arc::clone(self) as Arc<dyn CacheListener>;
        cache.remove_listener(&self.key, &listener);
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn chunk_index(&self) -> &ChunkIndex {
        &self.chunk_index
    }

    /// Current cached regions in byte order.
    pub fn regions(&self) -> Vec<Range<u64>> {
        self.regions.lock().iter().cloned().collect()
    }

    /// Where the cached region containing `byte_offset` ends, in media time.
    ///
    /// An offset equal to a region's end still belongs to that region.
    pub fn region_end_time_ms(&self, byte_offset: u64) -> RegionEnd {
        let end = {
            let regions = self.regions.lock();
            let region = regions.get(&byte_offset).or_else(|| {
                byte_offset
                    .checked_sub(1)
                    .and_then(|prev| regions.get(&prev))
            });
            match region {
                Some(region) => region.end,
                None => return RegionEnd::NotCached,
            }
        };

        let Some(last) = self.chunk_index.last() else {
            return RegionEnd::NotCached;
        };
        if end >= last.byte_end() {
            return RegionEnd::CachedToEnd;
        }
        match self.chunk_index.time_us_for_byte(end) {
            Some(time_us) => RegionEnd::EndsAt {
                time_ms: time_us / 1_000,
            },
            None => RegionEnd::NotCached,
        }
    }

    /// [`region_end_time_ms`](Self::region_end_time_ms) for a media position.
    pub fn region_end_time_ms_at(&self, position_ms: u64) -> RegionEnd {
        match self
            .chunk_index
            .byte_for_time_us(position_ms.saturating_mul(1_000))
        {
            Some(offset) => self.region_end_time_ms(offset),
            None => RegionEnd::NotCached,
        }
    }

    fn span_range(&self, span: &CacheSpan) -> Option<Range<u64>> {
        if span.key != self.key || !span.is_cached {
            return None;
        }
        let end = span.end()?;
        (end > span.position).then_some(span.position..end)
    }
}

impl CacheListener for CachedRegionTracker {
    fn on_span_added(&self, span: &CacheSpan) {
        if let Some(range) = self.span_range(span) {
            self.regions.lock().insert(range);
        }
    }

    fn on_span_removed(&self, span: &CacheSpan) {
        if let Some(range) = self.span_range(span) {
            self.regions.lock().remove(range);
        }
    }

    fn on_span_touched(&self, _old: &CacheSpan, _new: &CacheSpan) {}
}
