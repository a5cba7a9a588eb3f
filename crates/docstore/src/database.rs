//! The document database
//!
//! A [`DocumentDatabase`] is a set of named collections of JSON documents
//! keyed by caller-chosen string ids. It runs fully in memory; when opened
//! on a directory, every mutation rewrites that collection's snapshot file
//! (`<name>.mp`, MessagePack) through a temp-file rename, and `open` loads
//! whatever snapshots the directory holds.
//!
//! # Thread Safety
//!
//! Collections are independently locked. Handles are cheap clones sharing
//! one database.

use crate::query::Query;
use crate::stats::{AtomicStats, QueryStats};
use dashmap::DashMap;
use modulestore_core::{Error, Result};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const SNAPSHOT_EXT: &str = "mp";

#[derive(Debug, Default)]
struct CollectionInner {
    docs: RwLock<FxHashMap<String, Json>>,
}

#[derive(Debug)]
struct DbShared {
    dir: Option<PathBuf>,
    collections: DashMap<String, Arc<CollectionInner>>,
    stats: AtomicStats,
}

/// Named collections of JSON documents.
#[derive(Debug, Clone)]
pub struct DocumentDatabase {
    shared: Arc<DbShared>,
}

impl DocumentDatabase {
    /// A database with no backing directory. Contents vanish on drop.
    pub fn in_memory() -> Self {
        Self {
            shared: Arc::new(DbShared {
                dir: None,
                collections: DashMap::new(),
                stats: AtomicStats::default(),
            }),
        }
    }

    /// Open a database over a directory, loading every snapshot in it.
    ///
    /// # Errors
    /// I/O errors creating or reading the directory, and
    /// `Error::Serialization` for a snapshot that fails to decode.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let collections = DashMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let bytes = fs::read(&path)?;
            let docs: FxHashMap<String, Json> = rmp_serde::from_slice(&bytes).map_err(|e| {
                Error::Serialization(format!("snapshot {}: {}", path.display(), e))
            })?;
            debug!(target: "modulestore::docstore", collection = name, documents = docs.len(), "Loaded snapshot");
            collections.insert(
                name.to_string(),
                Arc::new(CollectionInner {
                    docs: RwLock::new(docs),
                }),
            );
        }
        info!(target: "modulestore::docstore", dir = %dir.display(), collections = collections.len(), "Opened document database");

        Ok(Self {
            shared: Arc::new(DbShared {
                dir: Some(dir),
                collections,
                stats: AtomicStats::default(),
            }),
        })
    }

    /// A handle to a collection, created empty on first use.
    pub fn collection(&self, name: &str) -> Collection {
        let inner = self
            .shared
            .collections
            .entry(name.to_string())
            .or_default()
            .clone();
        Collection {
            name: name.to_string(),
            inner,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Names of collections holding at least one document, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .shared
            .collections
            .iter()
            .filter(|entry| !entry.value().docs.read().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// The backing directory, if any.
    pub fn data_dir(&self) -> Option<&Path> {
        self.shared.dir.as_deref()
    }

    /// Running operation counts.
    pub fn stats(&self) -> QueryStats {
        self.shared.stats.snapshot()
    }

    /// Zero the operation counts.
    pub fn reset_stats(&self) {
        self.shared.stats.reset();
    }
}

/// Handle to one collection.
#[derive(Debug, Clone)]
pub struct Collection {
    name: String,
    inner: Arc<CollectionInner>,
    shared: Arc<DbShared>,
}

impl Collection {
    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn persist(&self, docs: &FxHashMap<String, Json>) -> Result<()> {
        let Some(dir) = &self.shared.dir else {
            return Ok(());
        };
        let bytes = rmp_serde::to_vec(docs)
            .map_err(|e| Error::Serialization(format!("collection '{}': {}", self.name, e)))?;
        let target = dir.join(format!("{}.{}", self.name, SNAPSHOT_EXT));
        let tmp = dir.join(format!("{}.{}.tmp", self.name, SNAPSHOT_EXT));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    /// Insert a document under a fresh id.
    ///
    /// # Errors
    /// `Error::Storage` when the id is already taken.
    pub fn insert(&self, id: &str, doc: Json) -> Result<()> {
        self.shared.stats.record_write();
        let mut docs = self.inner.docs.write();
        if docs.contains_key(id) {
            return Err(Error::Storage(format!(
                "document '{}' already exists in collection '{}'",
                id, self.name
            )));
        }
        docs.insert(id.to_string(), doc);
        self.persist(&docs)
    }

    /// Insert or replace a document.
    pub fn upsert(&self, id: &str, doc: Json) -> Result<()> {
        self.shared.stats.record_write();
        let mut docs = self.inner.docs.write();
        docs.insert(id.to_string(), doc);
        self.persist(&docs)
    }

    /// The document under `id`, if any.
    pub fn get(&self, id: &str) -> Option<Json> {
        self.shared.stats.record_get();
        self.inner.docs.read().get(id).cloned()
    }

    /// True when a document exists under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.docs.read().contains_key(id)
    }

    /// Remove the document under `id`. Returns whether one existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        self.shared.stats.record_remove();
        let mut docs = self.inner.docs.write();
        let existed = docs.remove(id).is_some();
        if existed {
            self.persist(&docs)?;
        }
        Ok(existed)
    }

    /// Every (id, document) pair matching the query, sorted by id.
    pub fn find(&self, query: &Query) -> Vec<(String, Json)> {
        self.shared.stats.record_find();
        let docs = self.inner.docs.read();
        let mut matched: Vec<(String, Json)> = docs
            .iter()
            .filter(|(_, doc)| query.matches(doc))
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect();
        matched.sort_by(|a, b| a.0.cmp(&b.0));
        matched
    }

    /// Ids of documents matching the query, sorted.
    pub fn find_ids(&self, query: &Query) -> Vec<String> {
        self.shared.stats.record_find();
        let docs = self.inner.docs.read();
        let mut ids: Vec<String> = docs
            .iter()
            .filter(|(_, doc)| query.matches(doc))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Every document id, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.docs.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.inner.docs.read().len()
    }

    /// True when the collection holds no documents.
    pub fn is_empty(&self) -> bool {
        self.inner.docs.read().is_empty()
    }

    /// Remove every document.
    pub fn clear(&self) -> Result<()> {
        self.shared.stats.record_remove();
        let mut docs = self.inner.docs.write();
        docs.clear();
        self.persist(&docs)
    }
}
