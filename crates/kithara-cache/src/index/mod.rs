#![forbid(unsafe_code)]

//! Persistent content index.
//!
//! Maps content keys to stable ids and per-key metadata, and holds each key's
//! in-memory span set. Only `(id, key, metadata)` is persisted; spans are
//! rebuilt from span file names by the cache on startup.
//!
//! ## Normative
//! - A new key gets `max(existing ids) + 1` (`0` for an empty index).
//! - The id of a removed entry stays reserved until the next successful
//!   [`CachedContentIndex::store`], so span files still on disk can never be
//!   attributed to a different key.
//! - A failed `store` never rolls back in-memory state.
//! - An index that fails to load (corrupt, undecryptable, wrong key) is
//!   deleted and replaced by an empty one; it is never partially trusted.

mod cipher;
mod storage;

use std::collections::{BTreeMap, HashMap, hash_map::Entry};

pub use cipher::SecretKey;
pub use storage::{ContentRecord, FileIndexStorage, INDEX_FILE_NAME, IndexStorage};

use crate::{
    content::CachedContent,
    error::CacheResult,
    metadata::{ContentMetadata, ContentMetadataMutations},
};

pub struct CachedContentIndex {
    key_to_content: HashMap<String, CachedContent>,
    /// `None` marks an id whose entry was removed since the last store.
    id_to_key: BTreeMap<u32, Option<String>>,
    storage: Box<dyn IndexStorage>,
}

impl std::fmt::Debug for CachedContentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedContentIndex")
            .field("entries", &self.key_to_content.len())
            .field("ids", &self.id_to_key.len())
            .finish_non_exhaustive()
    }
}

impl CachedContentIndex {
    pub fn new(storage: Box<dyn IndexStorage>) -> Self {
        Self {
            key_to_content: HashMap::new(),
            id_to_key: BTreeMap::new(),
            storage,
        }
    }

    /// Load the persisted index.
    ///
    /// Returns `false` when the persisted index couldn't be trusted and the
    /// index starts empty.
    pub fn initialize(&mut self) -> bool {
        self.key_to_content.clear();
        self.id_to_key.clear();

        let records = match self.storage.load() {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "content index unreadable; starting empty");
                self.discard_persisted();
                return false;
            }
        };

        for record in records {
            let duplicate = self.key_to_content.contains_key(&record.key)
                || self.id_to_key.contains_key(&record.id);
            if duplicate {
                tracing::warn!(
                    key = %record.key,
                    id = record.id,
                    "content index has duplicate entries; starting empty"
                );
                self.key_to_content.clear();
                self.id_to_key.clear();
                self.discard_persisted();
                return false;
            }
            self.id_to_key.insert(record.id, Some(record.key.clone()));
            self.key_to_content.insert(
                record.key.clone(),
                CachedContent::new(record.id, record.key, record.metadata),
            );
        }

        tracing::debug!(entries = self.key_to_content.len(), "content index loaded");
        true
    }

    fn discard_persisted(&mut self) {
        if let Err(e) = self.storage.delete() {
            tracing::warn!(error = %e, "failed to delete untrusted content index");
        }
    }

    /// Persist the index.
    pub fn store(&mut self) -> CacheResult<()> {
        let mut records: Vec<ContentRecord> = self
            .key_to_content
            .values()
            .map(|c| ContentRecord {
                id: c.id(),
                key: c.key().to_string(),
                metadata: c.metadata().clone(),
            })
            .collect();
        records.sort_by_key(|r| r.id);

        self.storage.store(&records)?;

        self.id_to_key.retain(|_, key| key.is_some());
        Ok(())
    }

    /// Id of `key`, creating the entry if needed.
    pub fn assign_id_for_key(&mut self, key: &str) -> u32 {
        self.get_or_add(key).id()
    }

    pub(crate) fn get_or_add(&mut self, key: &str) -> &mut CachedContent {
        let id = self.next_id();
        match self.key_to_content.entry(key.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                self.id_to_key.insert(id, Some(key.to_string()));
                tracing::trace!(key = %key, id, "content id assigned");
                e.insert(CachedContent::new(
                    id,
                    key.to_string(),
                    ContentMetadata::default(),
                ))
            }
        }
    }

    fn next_id(&self) -> u32 {
        match self.id_to_key.last_key_value() {
            None => 0,
            Some((&max, _)) if max < u32::MAX => max + 1,
            Some(_) => (0..u32::MAX)
                .find(|id| !self.id_to_key.contains_key(id))
                .unwrap_or(u32::MAX),
        }
    }

    pub fn get(&self, key: &str) -> Option<&CachedContent> {
        self.key_to_content.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &str) -> Option<&mut CachedContent> {
        self.key_to_content.get_mut(key)
    }

    pub fn key_for_id(&self, id: u32) -> Option<&str> {
        self.id_to_key.get(&id).and_then(|k| k.as_deref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.key_to_content.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CachedContent> {
        self.key_to_content.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut CachedContent> {
        self.key_to_content.values_mut()
    }

    pub fn len(&self) -> usize {
        self.key_to_content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_to_content.is_empty()
    }

    /// Drop the entry for `key` if it holds nothing.
    pub fn maybe_remove(&mut self, key: &str) -> bool {
        if self.key_to_content.get(key).is_some_and(CachedContent::is_removable) {
            self.drop_entry(key);
            return true;
        }
        false
    }

    /// Drop every entry that holds nothing.
    pub fn remove_empty(&mut self) {
        let empty: Vec<String> = self
            .key_to_content
            .values()
            .filter(|c| c.is_removable())
            .map(|c| c.key().to_string())
            .collect();
        for key in empty {
            self.drop_entry(&key);
        }
    }

    /// Drop the entry for `key` together with its metadata.
    ///
    /// Spans must already be gone. An entry with outstanding holes keeps its id
    /// and loses only its metadata; returns whether the entry was dropped.
    pub fn remove(&mut self, key: &str) -> bool {
        let Some(content) = self.key_to_content.get_mut(key) else {
            return false;
        };
        if content.has_holes() || content.has_spans() {
            content.set_metadata(ContentMetadata::default());
            return false;
        }
        self.drop_entry(key);
        true
    }

    fn drop_entry(&mut self, key: &str) {
        if let Some(content) = self.key_to_content.remove(key) {
            self.id_to_key.insert(content.id(), None);
            tracing::trace!(key = %key, id = content.id(), "content entry removed");
        }
    }

    /// Apply `mutations` to the metadata of `key`, creating the entry if needed.
    ///
    /// Returns whether the metadata changed.
    pub fn apply_content_metadata_mutations(
        &mut self,
        key: &str,
        mutations: &ContentMetadataMutations,
    ) -> bool {
        let content = self.get_or_add(key);
        let updated = content.metadata().with_mutations(mutations);
        if &updated == content.metadata() {
            return false;
        }
        content.set_metadata(updated);
        true
    }

    /// Metadata of `key`; empty for unknown keys.
    pub fn content_metadata(&self, key: &str) -> ContentMetadata {
        self.key_to_content
            .get(key)
            .map(|c| c.metadata().clone())
            .unwrap_or_default()
    }
}
