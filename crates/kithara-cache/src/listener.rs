#![forbid(unsafe_code)]

use crate::span::CacheSpan;

/// Span events for one content key.
///
/// Callbacks run synchronously while the cache holds its state lock: they must
/// return quickly and must not call back into the cache.
pub trait CacheListener: Send + Sync {
    fn on_span_added(&self, span: &CacheSpan);

    fn on_span_removed(&self, span: &CacheSpan);

    fn on_span_touched(&self, old: &CacheSpan, new: &CacheSpan);
}
