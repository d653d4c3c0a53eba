#![forbid(unsafe_code)]

//! Per-key custom metadata.
//!
//! Metadata lives next to a key's spans but has its own lifecycle: it survives
//! the removal of the last span and is only dropped together with the content
//! entry (`Cache::remove_resource`).

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Name of the total content length value (`u64`, big endian).
pub const CONTENT_LENGTH: &str = "kithara.content-length";
/// Name of the redirected URI value (UTF-8).
pub const REDIRECTED_URI: &str = "kithara.redirected-uri";

/// Immutable set of named byte values.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMetadata {
    values: BTreeMap<String, Bytes>,
}

impl ContentMetadata {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.values.get(name)
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        let raw: [u8; 8] = self.values.get(name)?.as_ref().try_into().ok()?;
        Some(u64::from_be_bytes(raw))
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        std::str::from_utf8(self.values.get(name)?).ok()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get_u64(CONTENT_LENGTH)
    }

    pub fn redirected_uri(&self) -> Option<&str> {
        self.get_string(REDIRECTED_URI)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// A copy of `self` with `mutations` applied in order.
    pub fn with_mutations(&self, mutations: &ContentMetadataMutations) -> Self {
        let mut values = self.values.clone();
        for (name, edit) in &mutations.edits {
            match edit {
                Some(value) => {
                    values.insert(name.clone(), value.clone());
                }
                None => {
                    values.remove(name);
                }
            }
        }
        Self { values }
    }
}

/// Ordered edits applied to [`ContentMetadata`] as one unit.
///
/// A later edit of the same name wins.
#[derive(Clone, Debug, Default)]
pub struct ContentMetadataMutations {
    edits: Vec<(String, Option<Bytes>)>,
}

impl ContentMetadataMutations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.edits.push((name.into(), Some(value.into())));
        self
    }

    #[must_use]
    pub fn set_u64(self, name: impl Into<String>, value: u64) -> Self {
        self.set(name, Bytes::copy_from_slice(&value.to_be_bytes()))
    }

    #[must_use]
    pub fn set_string(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, Bytes::from(value.into()))
    }

    #[must_use]
    pub fn remove(mut self, name: impl Into<String>) -> Self {
        self.edits.push((name.into(), None));
        self
    }

    #[must_use]
    pub fn set_content_length(self, length: u64) -> Self {
        self.set_u64(CONTENT_LENGTH, length)
    }

    #[must_use]
    pub fn set_redirected_uri(self, uri: impl Into<String>) -> Self {
        self.set_string(REDIRECTED_URI, uri)
    }
}
