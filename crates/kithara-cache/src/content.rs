#![forbid(unsafe_code)]

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Condvar;

use crate::{
    metadata::ContentMetadata,
    span::{CacheSpan, span_file_name},
};

/// A reserved byte range of one content entry.
///
/// Writers waiting for the range park on `released`; the condvar is always
/// used with the owning cache's state mutex.
#[derive(Debug)]
pub(crate) struct HoleLock {
    position: u64,
    length: Option<u64>,
    pub(crate) released: Condvar,
}

impl HoleLock {
    fn end(&self) -> Option<u64> {
        self.length.map(|len| self.position.saturating_add(len))
    }

    fn overlaps(&self, position: u64, length: Option<u64>) -> bool {
        let other_end = length.map(|len| position.saturating_add(len));
        let starts_before_other_ends = other_end.is_none_or(|end| self.position < end);
        let other_starts_before_end = self.end().is_none_or(|end| position < end);
        starts_before_other_ends && other_starts_before_end
    }

    fn contains(&self, position: u64, length: Option<u64>) -> bool {
        if position < self.position {
            return false;
        }
        match (self.end(), length) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(end), Some(len)) => position.saturating_add(len) <= end,
        }
    }
}

/// Everything the cache knows about one content key.
#[derive(Debug)]
pub struct CachedContent {
    id: u32,
    key: String,
    metadata: ContentMetadata,
    spans: BTreeMap<u64, CacheSpan>,
    holes: Vec<Arc<HoleLock>>,
}

impl CachedContent {
    pub(crate) fn new(id: u32, key: String, metadata: ContentMetadata) -> Self {
        Self {
            id,
            key,
            metadata,
            spans: BTreeMap::new(),
            holes: Vec::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn metadata(&self) -> &ContentMetadata {
        &self.metadata
    }

    pub(crate) fn set_metadata(&mut self, metadata: ContentMetadata) {
        self.metadata = metadata;
    }

    /// Cached spans in position order.
    pub fn spans(&self) -> impl Iterator<Item = &CacheSpan> {
        self.spans.values()
    }

    pub fn has_spans(&self) -> bool {
        !self.spans.is_empty()
    }

    pub fn has_holes(&self) -> bool {
        !self.holes.is_empty()
    }

    /// Entry carries nothing worth keeping.
    pub fn is_removable(&self) -> bool {
        self.spans.is_empty() && self.holes.is_empty() && self.metadata.is_empty()
    }

    /// The cached span covering `position`, or the hole in front of the next
    /// cached span (capped at `length` when given).
    pub fn span_at(&self, position: u64, length: Option<u64>) -> CacheSpan {
        if let Some((_, floor)) = self.spans.range(..=position).next_back()
            && floor.contains(position)
        {
            return floor.clone();
        }

        let to_next = self
            .spans
            .range(position..)
            .next()
            .map(|(start, _)| start - position);
        match (to_next, length) {
            (None, None) => CacheSpan::open_hole(self.key.clone(), position),
            (Some(gap), None) | (None, Some(gap)) => CacheSpan::hole(self.key.clone(), position, gap),
            (Some(gap), Some(len)) => CacheSpan::hole(self.key.clone(), position, gap.min(len)),
        }
    }

    /// Contiguous cached bytes from `position`, capped at `length`.
    ///
    /// Negative when `position` isn't cached: the magnitude is then the
    /// distance to the next cached byte, capped at `length`.
    pub fn cached_length(&self, position: u64, length: u64) -> i64 {
        let span = self.span_at(position, Some(length));
        if span.is_hole() {
            return -to_i64(span.len_or_zero().min(length));
        }

        let query_end = position.saturating_add(length);
        let mut run_end = span.end().unwrap_or(position);
        if run_end < query_end {
            for next in self.spans.range(run_end..).map(|(_, s)| s) {
                if next.position > run_end {
                    break;
                }
                run_end = run_end.max(next.end().unwrap_or(run_end));
                if run_end >= query_end {
                    break;
                }
            }
        }
        to_i64((run_end - position).min(length))
    }

    /// Total cached bytes inside `[position, position + length)`, gaps skipped.
    pub fn cached_bytes(&self, position: u64, length: Option<u64>) -> u64 {
        let query_end = length.map_or(u64::MAX, |len| position.saturating_add(len));
        let first = self
            .spans
            .range(..=position)
            .next_back()
            .map_or(position, |(start, _)| *start);

        self.spans
            .range(first..query_end)
            .map(|(_, span)| {
                let start = span.position.max(position);
                let end = span.end().unwrap_or(start).min(query_end);
                end.saturating_sub(start)
            })
            .sum()
    }

    pub(crate) fn add_span(&mut self, span: CacheSpan) {
        self.spans.insert(span.position, span);
    }

    /// Remove `span` if this entry still holds it.
    pub(crate) fn remove_span(&mut self, span: &CacheSpan) -> Option<CacheSpan> {
        match self.spans.get(&span.position) {
            Some(held) if held.file == span.file => self.spans.remove(&span.position),
            _ => None,
        }
    }

    /// Move `span` to `timestamp`, renaming its file when `rename_file` is set.
    ///
    /// A failed rename keeps the old file; the span is still re-stamped.
    pub(crate) fn touch_span(
        &mut self,
        span: &CacheSpan,
        timestamp: u64,
        rename_file: bool,
    ) -> Option<CacheSpan> {
        let held = self.spans.get_mut(&span.position)?;
        if held.file != span.file {
            return None;
        }

        let mut file = held.file.clone();
        if rename_file && let Some(old) = held.file.as_ref() {
            let renamed = old.with_file_name(span_file_name(self.id, held.position, timestamp));
            match std::fs::rename(old, &renamed) {
                Ok(()) => file = Some(renamed),
                Err(e) => {
                    tracing::warn!(
                        key = %self.key,
                        from = ?old,
                        to = ?renamed,
                        error = %e,
                        "failed to rename touched span file"
                    );
                }
            }
        }

        held.file = file;
        held.last_touch_timestamp = timestamp;
        Some(held.clone())
    }

    /// Drop spans whose backing file no longer exists; returns them.
    pub(crate) fn take_stale_spans(&mut self) -> Vec<CacheSpan> {
        let stale: Vec<u64> = self
            .spans
            .values()
            .filter(|s| !s.file.as_deref().is_some_and(std::path::Path::exists))
            .map(|s| s.position)
            .collect();
        stale
            .into_iter()
            .filter_map(|pos| self.spans.remove(&pos))
            .collect()
    }

    // -- holes ---------------------------------------------------------------

    /// The outstanding hole overlapping the range, if any.
    pub(crate) fn conflicting_hole(
        &self,
        position: u64,
        length: Option<u64>,
    ) -> Option<Arc<HoleLock>> {
        self.holes
            .iter()
            .find(|h| h.overlaps(position, length))
            .cloned()
    }

    /// Reserve the range. The caller has checked [`Self::conflicting_hole`].
    pub(crate) fn lock_range(&mut self, position: u64, length: Option<u64>) {
        self.holes.push(Arc::new(HoleLock {
            position,
            length,
            released: Condvar::new(),
        }));
    }

    /// Release the reservation starting at `position` and wake its waiters.
    pub(crate) fn unlock_range(&mut self, position: u64, length: Option<u64>) -> bool {
        let Some(idx) = self
            .holes
            .iter()
            .position(|h| h.position == position && h.length == length)
        else {
            return false;
        };
        let hole = self.holes.swap_remove(idx);
        hole.released.notify_all();
        true
    }

    /// Release every reservation and wake all waiters.
    pub(crate) fn unlock_all(&mut self) {
        for hole in self.holes.drain(..) {
            hole.released.notify_all();
        }
    }

    /// Whether one reservation covers the whole range.
    pub(crate) fn is_fully_locked(&self, position: u64, length: Option<u64>) -> bool {
        self.holes.iter().any(|h| h.contains(position, length))
    }
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
