#![forbid(unsafe_code)]

//! Directory-backed [`Cache`].
//!
//! ## Disk layout
//! ```text
//! <dir>/content_index.bin                    key -> id + metadata
//! <dir>/<hex uid>.uid                        empty marker file
//! <dir>/cache.lock                           exclusive directory lock
//! <dir>/<0-9>/<id>.<position>.<ts>.span      one file per cached span
//! ```
//! Span lengths come from file sizes, so spans are recovered by scanning the
//! directory once the index has been loaded. A span file whose id the index
//! doesn't know (for example after an unreadable index was discarded) is
//! deleted, as is anything else the cache doesn't recognize.

use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use kithara_storage::{DirLock, StorageError};
use parking_lot::Mutex;
use rand::Rng;

use crate::{
    builder::SimpleCacheBuilder,
    cache::Cache,
    content::HoleLock,
    error::{CacheError, CacheResult},
    evict::{CacheEvictor, EvictionTarget},
    index::{CachedContentIndex, INDEX_FILE_NAME, IndexStorage},
    listener::CacheListener,
    metadata::{ContentMetadata, ContentMetadataMutations},
    span::{CacheSpan, now_ms, parse_span_path, span_file_name},
    uid,
};

pub const LOCK_FILE_NAME: &str = "cache.lock";
const SUBDIRECTORY_COUNT: u32 = 10;

/// State the evictor is allowed to mutate.
struct CacheState {
    dir: PathBuf,
    index: CachedContentIndex,
    listeners: HashMap<String, Vec<Arc<dyn CacheListener>>>,
    total_space: u64,
}

impl CacheState {
    fn listeners_of(&self, key: &str) -> &[Arc<dyn CacheListener>] {
        self.listeners.get(key).map_or(&[], Vec::as_slice)
    }

    fn notify_added(&self, span: &CacheSpan) {
        for l in self.listeners_of(&span.key) {
            l.on_span_added(span);
        }
    }

    fn notify_removed(&self, span: &CacheSpan) {
        for l in self.listeners_of(&span.key) {
            l.on_span_removed(span);
        }
    }

    fn notify_touched(&self, old: &CacheSpan, new: &CacheSpan) {
        for l in self.listeners_of(&old.key) {
            l.on_span_touched(old, new);
        }
    }

    /// Drop `span` from memory and disk. Does not persist the index.
    fn remove_span_internal(&mut self, span: &CacheSpan) -> Option<CacheSpan> {
        let removed = self.index.get_mut(&span.key)?.remove_span(span)?;
        self.total_space = self.total_space.saturating_sub(removed.len_or_zero());
        if let Some(file) = &removed.file {
            delete_file(file);
        }
        self.index.maybe_remove(&removed.key);
        self.notify_removed(&removed);
        tracing::trace!(key = %removed.key, position = removed.position, "span removed");
        Some(removed)
    }

    /// Drop spans whose files vanished from disk.
    fn remove_stale_spans(&mut self) -> Vec<CacheSpan> {
        let mut stale = Vec::new();
        for content in self.index.iter_mut() {
            stale.extend(content.take_stale_spans());
        }
        for span in &stale {
            tracing::warn!(key = %span.key, position = span.position, file = ?span.file, "span file missing");
            self.total_space = self.total_space.saturating_sub(span.len_or_zero());
            self.index.maybe_remove(&span.key);
            self.notify_removed(span);
        }
        stale
    }
}

impl EvictionTarget for CacheState {
    fn remove_span(&mut self, span: &CacheSpan) -> CacheResult<()> {
        if self.remove_span_internal(span).is_none() {
            return Ok(());
        }
        self.index.store()
    }
}

fn delete_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = ?path, error = %e, "failed to delete cache file"),
    }
}

fn requested_hole(key: &str, position: u64, length: Option<u64>) -> CacheSpan {
    match length {
        Some(length) => CacheSpan::hole(key, position, length),
        None => CacheSpan::open_hole(key, position),
    }
}

enum Acquire {
    Span(CacheSpan),
    Busy(Arc<HoleLock>),
}

struct CacheInner {
    state: CacheState,
    evictor: Box<dyn CacheEvictor>,
    dir_lock: Option<DirLock>,
    uid: Option<u64>,
    init_error: Option<String>,
    released: bool,
}

impl CacheInner {
    fn ensure_open(&self) -> CacheResult<()> {
        if self.released {
            return Err(CacheError::Released);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> CacheResult<()> {
        self.ensure_open()?;
        match &self.init_error {
            Some(e) => Err(CacheError::Initialization(e.clone())),
            None => Ok(()),
        }
    }

    fn initialize(&mut self) -> CacheResult<()> {
        let dir = self.state.dir.clone();
        std::fs::create_dir_all(&dir)?;

        let lock = DirLock::acquire(&dir, LOCK_FILE_NAME).map_err(|e| match e {
            StorageError::Locked { path } => CacheError::Locked { dir: path },
            other => CacheError::Storage(other),
        })?;
        self.dir_lock = Some(lock);

        let uid = uid::load_or_create(&dir)?;

        if !self.state.index.initialize() {
            tracing::warn!(dir = ?dir, "content index discarded; unaccounted span files will be deleted");
        }
        self.load_directory(&dir, true)?;
        self.evictor.on_cache_initialized();

        self.state.index.remove_empty();
        if let Err(e) = self.state.index.store() {
            tracing::warn!(dir = ?dir, error = %e, "failed to store content index after initialization");
        }

        self.uid = Some(uid);
        tracing::debug!(
            dir = ?dir,
            uid = %format!("{uid:x}"),
            keys = self.state.index.len(),
            bytes = self.state.total_space,
            "cache initialized"
        );
        Ok(())
    }

    fn load_directory(&mut self, dir: &Path, is_root: bool) -> CacheResult<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if is_root
                && (name == INDEX_FILE_NAME || name == LOCK_FILE_NAME || uid::is_uid_file(&name))
            {
                continue;
            }

            if entry.file_type()?.is_dir() {
                if is_root {
                    self.load_directory(&path, false)?;
                } else if let Err(e) = std::fs::remove_dir_all(&path) {
                    tracing::warn!(path = ?path, error = %e, "failed to delete stray directory");
                }
                continue;
            }

            let length = entry.metadata()?.len();
            match self.span_from_file(&path, length) {
                Some(span) => {
                    if let Err(e) = self.add_span(span) {
                        tracing::warn!(path = ?path, error = %e, "eviction failed while loading spans");
                    }
                }
                None => {
                    tracing::debug!(path = ?path, "deleting unaccounted cache file");
                    delete_file(&path);
                }
            }
        }
        Ok(())
    }

    fn span_from_file(&self, path: &Path, length: u64) -> Option<CacheSpan> {
        if length == 0 {
            return None;
        }
        let parsed = parse_span_path(path)?;
        let key = self.state.index.key_for_id(parsed.id)?;
        let content = self.state.index.get(key)?;
        if content.cached_bytes(parsed.position, Some(length)) > 0 {
            return None;
        }
        Some(CacheSpan::cached(
            key,
            parsed.position,
            length,
            path.to_path_buf(),
            parsed.timestamp,
        ))
    }

    /// Register a cached span and let the evictor react.
    fn add_span(&mut self, span: CacheSpan) -> CacheResult<()> {
        let content = self
            .state
            .index
            .get_mut(&span.key)
            .ok_or_else(|| CacheError::UnknownKey(span.key.clone()))?;
        content.add_span(span.clone());
        self.state.total_space = self.state.total_space.saturating_add(span.len_or_zero());
        self.state.notify_added(&span);
        self.evictor.on_span_added(&mut self.state, &span)
    }

    fn remove_stale_spans(&mut self) {
        for span in self.state.remove_stale_spans() {
            self.evictor.on_span_removed(&span);
        }
    }

    fn span_at(&mut self, key: &str, position: u64, length: Option<u64>) -> CacheSpan {
        loop {
            let span = match self.state.index.get(key) {
                Some(content) => content.span_at(position, length),
                None => return requested_hole(key, position, length),
            };
            if span.is_hole() || span.file.as_deref().is_some_and(Path::exists) {
                return span;
            }
            self.remove_stale_spans();
        }
    }

    fn touch_span(&mut self, span: CacheSpan) -> CacheSpan {
        if !self.evictor.requires_cache_span_touches() {
            return span;
        }
        let Some(content) = self.state.index.get_mut(&span.key) else {
            return span;
        };
        let Some(touched) = content.touch_span(&span, now_ms(), true) else {
            return span;
        };
        self.state.notify_touched(&span, &touched);
        if let Err(e) = self
            .evictor
            .on_span_touched(&mut self.state, &span, &touched)
        {
            tracing::warn!(key = %span.key, position = span.position, error = %e, "eviction after touch failed");
        }
        touched
    }

    fn try_start_read_write(&mut self, key: &str, position: u64, length: Option<u64>) -> Acquire {
        let span = self.span_at(key, position, length);
        if span.is_cached {
            return Acquire::Span(self.touch_span(span));
        }

        let content = self.state.index.get_or_add(key);
        if let Some(hole) = content.conflicting_hole(position, span.length) {
            return Acquire::Busy(hole);
        }
        content.lock_range(position, span.length);
        tracing::trace!(key = %key, position, length = ?span.length, "hole reserved");
        Acquire::Span(span)
    }

    fn start_file(&mut self, key: &str, position: u64, length: Option<u64>) -> CacheResult<PathBuf> {
        let content = self
            .state
            .index
            .get(key)
            .ok_or_else(|| CacheError::UnknownKey(key.to_string()))?;
        if !content.is_fully_locked(position, length) {
            return Err(CacheError::NotLocked {
                key: key.to_string(),
                position,
            });
        }
        let id = content.id();

        let dir = self.state.dir.clone();
        if !dir.is_dir() {
            std::fs::create_dir_all(&dir)?;
            self.remove_stale_spans();
        }

        if let Err(e) = self
            .evictor
            .on_start_file(&mut self.state, key, position, length)
        {
            tracing::warn!(key = %key, position, error = %e, "eviction before write failed");
        }

        let subdir = dir.join(
            rand::thread_rng()
                .gen_range(0..SUBDIRECTORY_COUNT)
                .to_string(),
        );
        std::fs::create_dir_all(&subdir)?;
        Ok(subdir.join(span_file_name(id, position, now_ms())))
    }

    fn commit_file(&mut self, file: &Path, length: u64) -> CacheResult<()> {
        if !file.exists() {
            return Ok(());
        }
        if length == 0 {
            delete_file(file);
            return Ok(());
        }

        let invalid = || CacheError::InvalidSpanFile {
            path: file.to_path_buf(),
        };
        let parsed = parse_span_path(file).ok_or_else(invalid)?;
        let key = self
            .state
            .index
            .key_for_id(parsed.id)
            .ok_or_else(invalid)?
            .to_string();
        let content = self
            .state
            .index
            .get(&key)
            .ok_or_else(|| CacheError::UnknownKey(key.clone()))?;

        if !content.is_fully_locked(parsed.position, Some(length)) {
            return Err(CacheError::NotLocked {
                key,
                position: parsed.position,
            });
        }
        if let Some(content_length) = content.metadata().content_length()
            && parsed.position.saturating_add(length) > content_length
        {
            return Err(CacheError::ContentLengthExceeded {
                key,
                position: parsed.position,
                length,
                content_length,
            });
        }

        tracing::debug!(key = %key, position = parsed.position, length, "span committed");
        let span = CacheSpan::cached(
            key,
            parsed.position,
            length,
            file.to_path_buf(),
            parsed.timestamp,
        );
        let evicted = self.add_span(span);
        let stored = self.state.index.store();
        evicted.and(stored)
    }

    fn remove_span(&mut self, span: &CacheSpan) -> CacheResult<()> {
        let Some(removed) = self.state.remove_span_internal(span) else {
            return Ok(());
        };
        self.evictor.on_span_removed(&removed);
        self.state.index.store()
    }

    fn remove_resource(&mut self, key: &str) -> CacheResult<()> {
        let Some(content) = self.state.index.get(key) else {
            return Ok(());
        };
        let spans: Vec<CacheSpan> = content.spans().cloned().collect();
        for span in &spans {
            if let Some(removed) = self.state.remove_span_internal(span) {
                self.evictor.on_span_removed(&removed);
            }
        }
        self.state.index.remove(key);
        tracing::debug!(key = %key, spans = spans.len(), "resource removed");
        self.state.index.store()
    }

    fn release_hole(&mut self, hole: &CacheSpan) {
        let Some(content) = self.state.index.get_mut(&hole.key) else {
            tracing::debug!(key = %hole.key, position = hole.position, "released hole of unknown key");
            return;
        };
        if !content.unlock_range(hole.position, hole.length) {
            tracing::debug!(key = %hole.key, position = hole.position, "released hole was not held");
        }
        self.state.index.maybe_remove(&hole.key);
    }

    fn release(&mut self) -> CacheResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        for content in self.state.index.iter_mut() {
            content.unlock_all();
        }
        self.state.listeners.clear();

        let stored = if self.init_error.is_none() {
            self.state.index.remove_empty();
            self.state.index.store()
        } else {
            Ok(())
        };
        if let Err(e) = &stored {
            tracing::error!(dir = ?self.state.dir, error = %e, "failed to store content index on release");
        }

        self.dir_lock = None;
        tracing::debug!(dir = ?self.state.dir, "cache released");
        stored
    }
}

/// A [`Cache`] over one exclusively owned directory.
///
/// The instance is the session: construction locks the directory, [`Cache::release`]
/// (or drop) unlocks it. A second instance over a locked directory fails with
/// [`CacheError::Locked`]. Any other startup failure leaves a constructed but
/// inert cache: [`Cache::uid`] is `None` and mutating calls return
/// [`CacheError::Initialization`].
pub struct SimpleCache {
    dir: PathBuf,
    inner: Mutex<CacheInner>,
}

impl std::fmt::Debug for SimpleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleCache")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl SimpleCache {
    /// Open a cache over `cache_dir` with an unencrypted index.
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        evictor: impl CacheEvictor + 'static,
    ) -> CacheResult<Self> {
        SimpleCacheBuilder::new()
            .cache_dir(cache_dir)
            .evictor(evictor)
            .build()
    }

    pub fn builder() -> SimpleCacheBuilder {
        SimpleCacheBuilder::new()
    }

    pub(crate) fn open(
        dir: PathBuf,
        evictor: Box<dyn CacheEvictor>,
        index_storage: Box<dyn IndexStorage>,
    ) -> CacheResult<Self> {
        let mut inner = CacheInner {
            state: CacheState {
                dir: dir.clone(),
                index: CachedContentIndex::new(index_storage),
                listeners: HashMap::new(),
                total_space: 0,
            },
            evictor,
            dir_lock: None,
            uid: None,
            init_error: None,
            released: false,
        };

        match inner.initialize() {
            Ok(()) => {}
            Err(e @ CacheError::Locked { .. }) => return Err(e),
            Err(e) => {
                tracing::error!(dir = ?dir, error = %e, "cache initialization failed");
                inner.init_error = Some(e.to_string());
            }
        }

        Ok(Self {
            dir,
            inner: Mutex::new(inner),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.dir
    }

    fn read<T>(&self, f: impl FnOnce(&CacheInner) -> T) -> CacheResult<T> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(f(&inner))
    }

    fn write<T>(&self, f: impl FnOnce(&mut CacheInner) -> CacheResult<T>) -> CacheResult<T> {
        let mut inner = self.inner.lock();
        inner.ensure_writable()?;
        f(&mut inner)
    }
}

impl Cache for SimpleCache {
    fn uid(&self) -> Option<u64> {
        self.inner.lock().uid
    }

    fn release(&self) -> CacheResult<()> {
        self.inner.lock().release()
    }

    fn add_listener(
        &self,
        key: &str,
        listener: Arc<dyn CacheListener>,
    ) -> CacheResult<Vec<CacheSpan>> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        let spans: Vec<CacheSpan> = inner
            .state
            .index
            .get(key)
            .map(|c| c.spans().cloned().collect())
            .unwrap_or_default();
        for span in &spans {
            listener.on_span_added(span);
        }
        inner
            .state
            .listeners
            .entry(key.to_string())
            .or_default()
            .push(listener);
        Ok(spans)
    }

    fn remove_listener(&self, key: &str, listener: &Arc<dyn CacheListener>) {
        let mut inner = self.inner.lock();
        if let Some(list) = inner.state.listeners.get_mut(key) {
            list.retain(|l| !Arc::ptr_eq(l, listener));
            if list.is_empty() {
                inner.state.listeners.remove(key);
            }
        }
    }

    fn cached_spans(&self, key: &str) -> CacheResult<Vec<CacheSpan>> {
        self.read(|inner| {
            inner
                .state
                .index
                .get(key)
                .map(|c| c.spans().cloned().collect())
                .unwrap_or_default()
        })
    }

    fn keys(&self) -> CacheResult<Vec<String>> {
        self.read(|inner| inner.state.index.keys().map(str::to_string).collect())
    }

    fn cache_space(&self) -> CacheResult<u64> {
        self.read(|inner| inner.state.total_space)
    }

    fn start_read_write(
        &self,
        key: &str,
        position: u64,
        length: Option<u64>,
    ) -> CacheResult<CacheSpan> {
        let mut inner = self.inner.lock();
        loop {
            inner.ensure_writable()?;
            match inner.try_start_read_write(key, position, length) {
                Acquire::Span(span) => return Ok(span),
                Acquire::Busy(hole) => {
                    tracing::trace!(key = %key, position, "waiting for hole release");
                    hole.released.wait(&mut inner);
                }
            }
        }
    }

    fn start_read_write_non_blocking(
        &self,
        key: &str,
        position: u64,
        length: Option<u64>,
    ) -> CacheResult<Option<CacheSpan>> {
        self.write(|inner| {
            Ok(match inner.try_start_read_write(key, position, length) {
                Acquire::Span(span) => Some(span),
                Acquire::Busy(_) => None,
            })
        })
    }

    fn start_file(&self, key: &str, position: u64, length: Option<u64>) -> CacheResult<PathBuf> {
        self.write(|inner| inner.start_file(key, position, length))
    }

    fn commit_file(&self, file: &Path, length: u64) -> CacheResult<()> {
        self.write(|inner| inner.commit_file(file, length))
    }

    fn release_hole_span(&self, hole: &CacheSpan) -> CacheResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        inner.release_hole(hole);
        Ok(())
    }

    fn remove_resource(&self, key: &str) -> CacheResult<()> {
        self.write(|inner| inner.remove_resource(key))
    }

    fn remove_span(&self, span: &CacheSpan) -> CacheResult<()> {
        self.write(|inner| inner.remove_span(span))
    }

    fn is_cached(&self, key: &str, position: u64, length: u64) -> CacheResult<bool> {
        let cached = self.cached_length(key, position, length)?;
        Ok(u64::try_from(cached).is_ok_and(|n| n >= length))
    }

    fn cached_length(&self, key: &str, position: u64, length: u64) -> CacheResult<i64> {
        self.read(|inner| match inner.state.index.get(key) {
            Some(content) => content.cached_length(position, length),
            None => -i64::try_from(length).unwrap_or(i64::MAX),
        })
    }

    fn cached_bytes(&self, key: &str, position: u64, length: Option<u64>) -> CacheResult<u64> {
        self.read(|inner| {
            inner
                .state
                .index
                .get(key)
                .map_or(0, |c| c.cached_bytes(position, length))
        })
    }

    fn apply_content_metadata_mutations(
        &self,
        key: &str,
        mutations: &ContentMetadataMutations,
    ) -> CacheResult<()> {
        self.write(|inner| {
            inner
                .state
                .index
                .apply_content_metadata_mutations(key, mutations);
            inner.state.index.store()
        })
    }

    fn content_metadata(&self, key: &str) -> CacheResult<ContentMetadata> {
        self.read(|inner| inner.state.index.content_metadata(key))
    }
}

impl Drop for SimpleCache {
    fn drop(&mut self) {
        // Errors are logged by `release`.
        let _ = self.inner.get_mut().release();
    }
}
