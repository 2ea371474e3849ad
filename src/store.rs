//! Persistence for count documents
//!
//! A [`StoreBackend`] is a plain string key-value store. [`CountStore`] sits on
//! top of it and owns the key layout and JSON encoding:
//! - `doc/{id}`: [`CountDocument`] for a content item
//! - `url/{hash}`: [`UrlCountRecord`] for the site or an arbitrary URL
//!
//! Backends must make a single `put` atomic. There are no transactions;
//! read-modify-write callers re-read right before writing and the last writer
//! wins.

use crate::error::{CountError, Result};
use crate::hooks::CountHooks;
use crate::models::{url_hash, CountDocument, CountGroup, UrlCountRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::fs;
use tracing::{debug, warn};

const DOCUMENT_PREFIX: &str = "doc/";
const URL_PREFIX: &str = "url/";

#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value under `key` atomically
    async fn put(&self, key: &str, value: String) -> Result<()>;

    /// Every key starting with `prefix`
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove everything
    async fn clear(&self) -> Result<()>;
}

/// Process-local backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    storage: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.storage.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let storage = self
            .storage
            .read()
            .map_err(|e| CountError::storage(format!("lock poisoned: {}", e)))?;
        Ok(storage.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        let mut storage = self
            .storage
            .write()
            .map_err(|e| CountError::storage(format!("lock poisoned: {}", e)))?;
        storage.insert(key.to_string(), value);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let storage = self
            .storage
            .read()
            .map_err(|e| CountError::storage(format!("lock poisoned: {}", e)))?;
        let mut keys: Vec<String> = storage
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self) -> Result<()> {
        let mut storage = self
            .storage
            .write()
            .map_err(|e| CountError::storage(format!("lock poisoned: {}", e)))?;
        storage.clear();
        Ok(())
    }
}

/// One JSON file per key below a base directory.
///
/// Writes go to a temporary file in the target directory which is then
/// renamed over the old file, so readers never see a partial document.
#[derive(Debug, Clone)]
pub struct FileBackend {
    base_path: PathBuf,
}

impl FileBackend {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        FileBackend {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.contains("..")
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_'));
        if !valid {
            return Err(CountError::storage(format!("invalid store key '{}'", key)));
        }
        Ok(self.base_path.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl StoreBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CountError::storage(format!(
                "failed to read {:?}: {}",
                path, e
            ))),
        }
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        let path = self.path_for(key)?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.base_path.clone());

        fs::create_dir_all(&dir)
            .await
            .map_err(|e| CountError::storage(format!("failed to create {:?}: {}", dir, e)))?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut file = tempfile::NamedTempFile::new_in(&dir)
                .map_err(|e| CountError::storage(format!("failed to create temp file: {}", e)))?;
            file.write_all(value.as_bytes())
                .map_err(|e| CountError::storage(format!("failed to write temp file: {}", e)))?;
            file.persist(&path)
                .map_err(|e| CountError::storage(format!("failed to persist {:?}: {}", path, e)))?;
            Ok(())
        })
        .await
        .map_err(|e| CountError::storage(format!("write task failed: {}", e)))?
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let (dir_part, name_prefix) = match prefix.rfind('/') {
            Some(idx) => (&prefix[..idx], &prefix[idx + 1..]),
            None => ("", prefix),
        };
        let dir = self.base_path.join(dir_part);

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CountError::storage(format!(
                    "failed to list {:?}: {}",
                    dir, e
                )))
            }
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CountError::storage(format!("failed to list {:?}: {}", dir, e)))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if !stem.starts_with(name_prefix) {
                continue;
            }
            if dir_part.is_empty() {
                keys.push(stem.to_string());
            } else {
                keys.push(format!("{}/{}", dir_part, stem));
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.base_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CountError::storage(format!(
                "failed to clear {:?}: {}",
                self.base_path, e
            ))),
        }
    }
}

/// Typed access to count documents and URL records
#[derive(Clone)]
pub struct CountStore {
    backend: Arc<dyn StoreBackend>,
}

impl CountStore {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        CountStore { backend }
    }

    /// A store backed by process memory
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn document_key(id: u64) -> String {
        format!("{}{}", DOCUMENT_PREFIX, id)
    }

    pub fn url_key(url: &str) -> String {
        format!("{}{}", URL_PREFIX, url_hash(url))
    }

    /// Load the document of a content item.
    ///
    /// A stored value that does not decode is reported as absent so the next
    /// refresh overwrites it.
    pub async fn get(&self, id: u64) -> Result<Option<CountDocument>> {
        let key = Self::document_key(id);
        let Some(raw) = self.backend.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(doc) => Ok(Some(doc)),
            Err(e) => {
                warn!("Ignoring malformed count document key={}: {}", key, e);
                Ok(None)
            }
        }
    }

    pub async fn put(&self, id: u64, doc: &CountDocument) -> Result<()> {
        let key = Self::document_key(id);
        let raw = serde_json::to_string(doc)?;
        debug!("Storing count document key={} total={}", key, doc.total);
        self.backend.put(&key, raw).await
    }

    /// Re-read a document (or start an empty one), apply `f` and write it back
    pub async fn update<T, F>(&self, id: u64, f: F) -> Result<T>
    where
        F: FnOnce(&mut CountDocument) -> Result<T>,
    {
        let mut doc = self.get(id).await?.unwrap_or_default();
        let result = f(&mut doc)?;
        self.put(id, &doc).await?;
        Ok(result)
    }

    /// Remove a user-added group and take its counts out of the merged counts
    pub async fn delete_group(
        &self,
        id: u64,
        slug: &str,
        hooks: &dyn CountHooks,
    ) -> Result<CountGroup> {
        let existing = self.get(id).await?;
        let mut doc = existing.ok_or_else(|| CountError::UnknownItem(id.to_string()))?;

        let group = match doc.groups.get(slug) {
            Some(group) if group.is_synthetic() => {
                return Err(CountError::ProtectedGroup(slug.to_string()))
            }
            Some(_) => doc.groups.remove(slug),
            None => None,
        }
        .ok_or_else(|| CountError::UnknownGroup {
            item: id.to_string(),
            slug: slug.to_string(),
        })?;

        doc.counts = doc.counts.saturating_sub(&group.counts);
        doc.total = hooks.adjust_total(doc.counts.total(), &doc.counts);
        self.put(id, &doc).await?;
        Ok(group)
    }

    /// Load the record of the site or an arbitrary URL
    pub async fn get_url(&self, url: &str) -> Result<Option<UrlCountRecord>> {
        let key = Self::url_key(url);
        let Some(raw) = self.backend.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Ignoring malformed url record key={}: {}", key, e);
                Ok(None)
            }
        }
    }

    pub async fn put_url(&self, record: &UrlCountRecord) -> Result<()> {
        let key = Self::url_key(&record.url);
        let raw = serde_json::to_string(record)?;
        debug!("Storing url record key={} url={}", key, record.url);
        self.backend.put(&key, raw).await
    }

    /// IDs of every stored content document
    pub async fn content_ids(&self) -> Result<Vec<u64>> {
        let keys = self.backend.keys(DOCUMENT_PREFIX).await?;
        let mut ids: Vec<u64> = keys
            .iter()
            .filter_map(|k| k.strip_prefix(DOCUMENT_PREFIX))
            .filter_map(|id| id.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Remove every document and record
    pub async fn clear(&self) -> Result<()> {
        warn!("Clearing count store");
        self.backend.clear().await
    }
}
