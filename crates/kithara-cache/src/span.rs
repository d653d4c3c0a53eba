#![forbid(unsafe_code)]

use std::{
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

/// Extension of every span file.
pub(crate) const SPAN_FILE_SUFFIX: &str = "span";

/// A byte range of one content key.
///
/// A span is either **cached** (backed by a file, length known) or a **hole**
/// (a reservation handed to a writer; open-ended when the writer doesn't know
/// how many bytes will follow).
///
/// Spans are plain values: touching or removing a span produces a new value
/// and never mutates one already handed out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheSpan {
    pub key: String,
    pub position: u64,
    /// `None` only for an open-ended hole.
    pub length: Option<u64>,
    pub is_cached: bool,
    pub file: Option<PathBuf>,
    /// Milliseconds since the Unix epoch.
    pub last_touch_timestamp: u64,
}

impl CacheSpan {
    pub fn hole(key: impl Into<String>, position: u64, length: u64) -> Self {
        Self {
            key: key.into(),
            position,
            length: Some(length),
            is_cached: false,
            file: None,
            last_touch_timestamp: 0,
        }
    }

    pub fn open_hole(key: impl Into<String>, position: u64) -> Self {
        Self {
            key: key.into(),
            position,
            length: None,
            is_cached: false,
            file: None,
            last_touch_timestamp: 0,
        }
    }

    pub fn cached(
        key: impl Into<String>,
        position: u64,
        length: u64,
        file: PathBuf,
        last_touch_timestamp: u64,
    ) -> Self {
        Self {
            key: key.into(),
            position,
            length: Some(length),
            is_cached: true,
            file: Some(file),
            last_touch_timestamp,
        }
    }

    pub fn is_hole(&self) -> bool {
        !self.is_cached
    }

    pub fn is_open_ended(&self) -> bool {
        self.length.is_none()
    }

    /// Exclusive end offset, `None` when open-ended.
    pub fn end(&self) -> Option<u64> {
        self.length.map(|len| self.position.saturating_add(len))
    }

    /// Byte count of a cached span (0 for open-ended holes).
    pub(crate) fn len_or_zero(&self) -> u64 {
        self.length.unwrap_or(0)
    }

    /// Whether `offset` lies inside this span.
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.position && self.end().is_none_or(|end| offset < end)
    }
}

/// Fields encoded in a span file name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpanFileName {
    pub id: u32,
    pub position: u64,
    pub timestamp: u64,
}

/// `<id>.<position>.<timestamp>.span`
pub fn span_file_name(id: u32, position: u64, timestamp: u64) -> String {
    format!("{id}.{position}.{timestamp}.{SPAN_FILE_SUFFIX}")
}

/// Parse a span file name produced by [`span_file_name`].
pub fn parse_span_file_name(name: &str) -> Option<SpanFileName> {
    let mut parts = name.split('.');
    let id = parts.next()?.parse().ok()?;
    let position = parts.next()?.parse().ok()?;
    let timestamp = parts.next()?.parse().ok()?;
    if parts.next()? != SPAN_FILE_SUFFIX || parts.next().is_some() {
        return None;
    }
    Some(SpanFileName {
        id,
        position,
        timestamp,
    })
}

pub(crate) fn parse_span_path(path: &Path) -> Option<SpanFileName> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(parse_span_file_name)
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
