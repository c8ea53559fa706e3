//! Durable index for the feature artifact cache.
//!
//! Maps feature references to the content digest that was last extracted
//! for them, enabling digest-match short-circuits on later resolutions.
//! The index is never a correctness oracle by itself: a hit still
//! requires a fresh (or stale-fallback) remote resolution; it only avoids
//! redundant downloads and extraction when digests already match.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{DenliteError, DenliteResult};

const INDEX_FILE: &str = "index.json";

/// Index of locally cached feature artifacts.
///
/// Serialized as JSON for human readability. Loaded once per process and
/// rewritten in full on save. Entries are never evicted.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CacheIndex {
    /// Schema version for future compatibility
    pub version: String,

    /// Map of feature reference → cached artifact record
    pub features: HashMap<String, CacheEntry>,
}

/// Record for one cached artifact.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Manifest digest (sha256:...) the cached copy was extracted from
    pub digest: String,

    /// When the artifact was cached (ISO 8601)
    pub cached_at: String,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self {
            version: "1.0".to_string(),
            features: HashMap::new(),
        }
    }

    /// Load the index from the cache root.
    ///
    /// Returns an empty index if the file is missing or corrupted; a bad
    /// index only costs re-downloads, never correctness.
    pub fn load(cache_root: &Path) -> CacheIndex {
        let index_path = cache_root.join(INDEX_FILE);

        if !index_path.exists() {
            tracing::debug!("cache index not found, starting empty");
            return Self::new();
        }

        match std::fs::read_to_string(&index_path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(index) => {
                    tracing::debug!("loaded cache index with {} entries", index.features.len());
                    index
                }
                Err(e) => {
                    tracing::warn!("corrupted cache index, starting empty: {}", e);
                    Self::new()
                }
            },
            Err(e) => {
                tracing::warn!("unreadable cache index, starting empty: {}", e);
                Self::new()
            }
        }
    }

    /// Save the whole index to the cache root.
    pub fn save(&self, cache_root: &Path) -> DenliteResult<()> {
        let index_path = cache_root.join(INDEX_FILE);

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DenliteError::Storage(format!("failed to serialize cache index: {e}")))?;

        std::fs::write(&index_path, json)
            .map_err(|e| DenliteError::Storage(format!("failed to write cache index: {e}")))?;

        tracing::debug!("saved cache index with {} entries", self.features.len());
        Ok(())
    }

    pub fn get(&self, reference: &str) -> Option<&CacheEntry> {
        self.features.get(reference)
    }

    pub fn upsert(&mut self, reference: String, entry: CacheEntry) {
        self.features.insert(reference, entry);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}
