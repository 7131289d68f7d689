//! Named response caches, independent of the local database.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::http::FetchResponse;
use crate::store::StoreError;

/// Collection label used in storage errors.
const RESPONSE_CACHE: &str = "responses";

/// A set of named request→response caches.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    async fn match_request(&self, cache: &str, key: &str)
        -> Result<Option<FetchResponse>, StoreError>;

    /// Store `response` under `key`, creating the named cache if needed and
    /// replacing any previous entry.
    async fn put(&self, cache: &str, key: &str, response: FetchResponse) -> Result<(), StoreError>;

    /// Names of all existing caches.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Drop a whole named cache. Returns whether it existed.
    async fn delete(&self, cache: &str) -> Result<bool, StoreError>;
}

#[derive(Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<BTreeMap<String, HashMap<String, FetchResponse>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn match_request(
        &self,
        cache: &str,
        key: &str,
    ) -> Result<Option<FetchResponse>, StoreError> {
        let g = self.caches.read().await;
        Ok(g.get(cache).and_then(|entries| entries.get(key)).cloned())
    }

    async fn put(&self, cache: &str, key: &str, response: FetchResponse) -> Result<(), StoreError> {
        self.caches
            .write()
            .await
            .entry(cache.to_string())
            .or_default()
            .insert(key.to_string(), response);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }

    async fn delete(&self, cache: &str) -> Result<bool, StoreError> {
        Ok(self.caches.write().await.remove(cache).is_some())
    }
}

/// One JSON file per named cache under a directory.
pub struct JsonCacheStorage {
    dir: PathBuf,
    // Serializes read-modify-write cycles on the cache files.
    lock: Mutex<()>,
}

impl JsonCacheStorage {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    fn cache_path(&self, cache: &str) -> PathBuf {
        let safe: String = cache
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    fn read(path: &Path) -> Result<Option<HashMap<String, FetchResponse>>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let entries = serde_json::from_str(&contents).map_err(|source| StoreError::Serialization {
            collection: RESPONSE_CACHE,
            source,
        })?;
        Ok(Some(entries))
    }

    fn write(path: &Path, entries: &HashMap<String, FetchResponse>) -> Result<(), StoreError> {
        let contents = serde_json::to_string(entries).map_err(|source| StoreError::Serialization {
            collection: RESPONSE_CACHE,
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[async_trait]
impl CacheStorage for JsonCacheStorage {
    async fn match_request(
        &self,
        cache: &str,
        key: &str,
    ) -> Result<Option<FetchResponse>, StoreError> {
        let _g = self.lock.lock().await;
        let entries = Self::read(&self.cache_path(cache))?;
        Ok(entries.and_then(|mut entries| entries.remove(key)))
    }

    async fn put(&self, cache: &str, key: &str, response: FetchResponse) -> Result<(), StoreError> {
        let _g = self.lock.lock().await;
        let path = self.cache_path(cache);
        let mut entries = Self::read(&path)?.unwrap_or_default();
        entries.insert(key.to_string(), response);
        Self::write(&path, &entries)
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let _g = self.lock.lock().await;
        let read_dir = std::fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut names: Vec<String> = read_dir
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".json").map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, cache: &str) -> Result<bool, StoreError> {
        let _g = self.lock.lock().await;
        let path = self.cache_path(cache);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;

    #[tokio::test]
    async fn test_disk_cache_round_trip_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonCacheStorage::open(dir.path()).unwrap();
        let resp = FetchResponse::new(StatusCode::OK, "hello");

        storage.put("canvass-static-v1", "https://a/x.png", resp.clone()).await.unwrap();
        storage.put("canvass-api-v1", "https://a/api/voters", resp.clone()).await.unwrap();

        assert_eq!(
            storage.match_request("canvass-static-v1", "https://a/x.png").await.unwrap(),
            Some(resp)
        );
        assert_eq!(storage.keys().await.unwrap(), vec!["canvass-api-v1", "canvass-static-v1"]);
        assert!(storage.delete("canvass-api-v1").await.unwrap());
        assert!(!storage.delete("canvass-api-v1").await.unwrap());
        assert_eq!(storage.match_request("canvass-api-v1", "https://a/api/voters").await.unwrap(), None);
    }
}
