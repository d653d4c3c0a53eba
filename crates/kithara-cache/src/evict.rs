#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use crate::{error::CacheResult, span::CacheSpan};

/// What an evictor may do to the cache it is attached to.
pub trait EvictionTarget {
    /// Remove a cached span: drop it from memory, delete its file and persist
    /// the index.
    ///
    /// In-memory removal happens even when persisting fails. The evictor is not
    /// notified of removals it requests itself.
    fn remove_span(&mut self, span: &CacheSpan) -> CacheResult<()>;
}

/// Eviction policy.
///
/// Called synchronously by the cache at fixed mutation points, while the
/// cache's state lock is held.
///
/// ## Normative
/// - `on_start_file` runs before a writer starts a file of `length` bytes
///   (`None` when unknown) and may make room for it.
/// - `on_span_added` runs after every commit (and for each span found on disk
///   at startup).
/// - `on_span_touched` runs after a read re-stamped a span; only called when
///   [`requires_cache_span_touches`](Self::requires_cache_span_touches) is true.
/// - `on_span_removed` runs for removals the evictor did not request.
pub trait CacheEvictor: Send {
    fn requires_cache_span_touches(&self) -> bool;

    fn on_cache_initialized(&mut self) {}

    fn on_start_file(
        &mut self,
        target: &mut dyn EvictionTarget,
        key: &str,
        position: u64,
        length: Option<u64>,
    ) -> CacheResult<()>;

    fn on_span_added(&mut self, target: &mut dyn EvictionTarget, span: &CacheSpan)
    -> CacheResult<()>;

    fn on_span_removed(&mut self, span: &CacheSpan);

    fn on_span_touched(
        &mut self,
        target: &mut dyn EvictionTarget,
        old: &CacheSpan,
        new: &CacheSpan,
    ) -> CacheResult<()>;
}

/// Never evicts.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpCacheEvictor;

impl CacheEvictor for NoOpCacheEvictor {
    fn requires_cache_span_touches(&self) -> bool {
        false
    }

    fn on_start_file(
        &mut self,
        _target: &mut dyn EvictionTarget,
        _key: &str,
        _position: u64,
        _length: Option<u64>,
    ) -> CacheResult<()> {
        Ok(())
    }

    fn on_span_added(
        &mut self,
        _target: &mut dyn EvictionTarget,
        _span: &CacheSpan,
    ) -> CacheResult<()> {
        Ok(())
    }

    fn on_span_removed(&mut self, _span: &CacheSpan) {}

    fn on_span_touched(
        &mut self,
        _target: &mut dyn EvictionTarget,
        _old: &CacheSpan,
        _new: &CacheSpan,
    ) -> CacheResult<()> {
        Ok(())
    }
}

/// Oldest-first ordering; key and position break timestamp ties.
type LruKey = (u64, String, u64);

fn lru_key(span: &CacheSpan) -> LruKey {
    (span.last_touch_timestamp, span.key.clone(), span.position)
}

/// Keeps the total size of cached spans within `max_bytes` by removing the
/// least recently touched spans first.
///
/// A batch that hits a failing removal keeps going; the first error is
/// returned once the budget is met.
#[derive(Debug)]
pub struct LeastRecentlyUsedCacheEvictor {
    max_bytes: u64,
    lru: BTreeMap<LruKey, CacheSpan>,
    current_size: u64,
}

impl LeastRecentlyUsedCacheEvictor {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            lru: BTreeMap::new(),
            current_size: 0,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Bytes of the spans currently tracked.
    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    fn evict(&mut self, target: &mut dyn EvictionTarget, required: u64) -> CacheResult<()> {
        let mut first_err = None;
        while self.current_size.saturating_add(required) > self.max_bytes {
            let Some((_, span)) = self.lru.pop_first() else {
                break;
            };
            self.current_size = self.current_size.saturating_sub(span.len_or_zero());
            tracing::debug!(
                key = %span.key,
                position = span.position,
                length = span.len_or_zero(),
                current = self.current_size,
                max = self.max_bytes,
                "evicting least recently used span"
            );
            if let Err(e) = target.remove_span(&span) {
                tracing::warn!(key = %span.key, position = span.position, error = %e, "eviction step failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl CacheEvictor for LeastRecentlyUsedCacheEvictor {
    fn requires_cache_span_touches(&self) -> bool {
        true
    }

    fn on_start_file(
        &mut self,
        target: &mut dyn EvictionTarget,
        _key: &str,
        _position: u64,
        length: Option<u64>,
    ) -> CacheResult<()> {
        match length {
            Some(length) => self.evict(target, length),
            None => Ok(()),
        }
    }

    fn on_span_added(
        &mut self,
        target: &mut dyn EvictionTarget,
        span: &CacheSpan,
    ) -> CacheResult<()> {
        if self.lru.insert(lru_key(span), span.clone()).is_none() {
            self.current_size = self.current_size.saturating_add(span.len_or_zero());
        }
        self.evict(target, 0)
    }

    fn on_span_removed(&mut self, span: &CacheSpan) {
        if self.lru.remove(&lru_key(span)).is_some() {
            self.current_size = self.current_size.saturating_sub(span.len_or_zero());
        }
    }

    fn on_span_touched(
        &mut self,
        target: &mut dyn EvictionTarget,
        old: &CacheSpan,
        new: &CacheSpan,
    ) -> CacheResult<()> {
        self.on_span_removed(old);
        self.on_span_added(target, new)
    }
}
