use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::collection::Collection;
use super::{Record, Store, StoreError};

#[derive(Debug, Serialize, Deserialize)]
struct CollectionFile<T> {
    saved_at: DateTime<Utc>,
    records: Vec<T>,
}

/// A `Store` persisted as one JSON file per collection.
///
/// Every mutation is applied to a copy, written to a temp file and renamed
/// over the previous file; only then does the in-memory copy change. A
/// failed write leaves both the file and the store as they were.
pub struct JsonFileStore<T> {
    path: PathBuf,
    inner: Mutex<Collection<T>>,
}

impl<T: Record> JsonFileStore<T> {
    /// Open (or create) the collection file inside `dir`.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(format!("{}.json", T::COLLECTION));
        let collection = Self::load(&path)?;
        debug!(collection = T::COLLECTION, records = collection.len(), "Opened collection");
        Ok(Self {
            path,
            inner: Mutex::new(collection),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<Collection<T>, StoreError> {
        if !path.exists() {
            return Ok(Collection::new());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: CollectionFile<T> =
            serde_json::from_str(&contents).map_err(|source| StoreError::Serialization {
                collection: T::COLLECTION,
                source,
            })?;
        Ok(Collection::from_records(file.records))
    }

    fn save(&self, collection: &Collection<T>) -> Result<(), StoreError> {
        let file = CollectionFile {
            saved_at: Utc::now(),
            records: collection.values().collect::<Vec<_>>(),
        };
        let contents =
            serde_json::to_string_pretty(&file).map_err(|source| StoreError::Serialization {
                collection: T::COLLECTION,
                source,
            })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }

    async fn mutate<R>(
        &self,
        f: impl FnOnce(&mut Collection<T>) -> R,
    ) -> Result<R, StoreError> {
        let mut g = self.inner.lock().await;
        let mut next = g.clone();
        let result = f(&mut next);
        self.save(&next)?;
        *g = next;
        Ok(result)
    }
}

#[async_trait]
impl<T: Record> Store<T> for JsonFileStore<T> {
    async fn get(&self, key: &str) -> Result<Option<T>, StoreError> {
        Ok(self.inner.lock().await.get(key).cloned())
    }

    async fn all(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.inner.lock().await.values().cloned().collect())
    }

    async fn put(&self, record: T) -> Result<(), StoreError> {
        self.mutate(|c| c.insert(record)).await
    }

    async fn put_many(&self, records: Vec<T>) -> Result<(), StoreError> {
        self.mutate(|c| {
            for record in records {
                c.insert(record);
            }
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        if self.inner.lock().await.get(key).is_none() {
            return Ok(false);
        }
        self.mutate(|c| c.remove(key).is_some()).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync),
        replacement: Option<T>,
    ) -> Result<bool, StoreError> {
        let mut g = self.inner.lock().await;
        if !g.get(key).map(expected).unwrap_or(false) {
            return Ok(false);
        }
        let mut next = g.clone();
        next.remove(key);
        if let Some(record) = replacement {
            next.insert(record);
        }
        self.save(&next)?;
        *g = next;
        Ok(true)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.mutate(|c| c.clear()).await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.lock().await.len())
    }

    async fn find_by(&self, index: &str, value: &str) -> Result<Vec<T>, StoreError> {
        self.inner.lock().await.find_by(index, value)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::{PendingSyncItem, SyncAction, SyncItemType};

    fn item(id: &str) -> PendingSyncItem {
        PendingSyncItem {
            id: id.to_string(),
            kind: SyncItemType::Contact,
            action: SyncAction::Create,
            data: serde_json::json!({"localId": id}),
            created_at: Utc::now(),
            retry_count: 0,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonFileStore::<PendingSyncItem>::open(dir.path()).unwrap();
            store.put(item("local_1_a")).await.unwrap();
            store.put(item("local_2_b")).await.unwrap();
            assert!(store.delete("local_1_a").await.unwrap());
        }

        let reopened = JsonFileStore::<PendingSyncItem>::open(dir.path()).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        let by_action = reopened.find_by("action", "create").await.unwrap();
        assert_eq!(by_action.len(), 1);
        assert_eq!(by_action[0].id, "local_2_b");
        assert!(reopened.path().ends_with("pendingSync.json"));
    }

    #[tokio::test]
    async fn test_compare_and_delete_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::<PendingSyncItem>::open(dir.path()).unwrap();
        let queued = item("local_1_a");
        store.put(queued.clone()).await.unwrap();

        assert!(!store
            .compare_and_swap("local_1_a", &|i: &PendingSyncItem| i.retry_count == 9, None)
            .await
            .unwrap());
        assert!(store
            .compare_and_swap("local_1_a", &|i: &PendingSyncItem| *i == queued, None)
            .await
            .unwrap());

        let reopened = JsonFileStore::<PendingSyncItem>::open(dir.path()).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pendingSync.json"), "{not json").unwrap();
        let err = JsonFileStore::<PendingSyncItem>::open(dir.path()).err().unwrap();
        assert!(matches!(err, StoreError::Serialization { collection: "pendingSync", .. }));
    }
}
