use async_trait::async_trait;
use tokio::sync::RwLock;

use super::collection::Collection;
use super::{Record, Store, StoreError};

/// In-memory `Store` backed by a `BTreeMap`.
///
/// Not persisted across restarts.
pub struct MemoryStore<T> {
    inner: RwLock<Collection<T>>,
}

impl<T: Record> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Collection::new()),
        }
    }
}

impl<T: Record> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Record> Store<T> for MemoryStore<T> {
    async fn get(&self, key: &str) -> Result<Option<T>, StoreError> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn all(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.inner.read().await.values().cloned().collect())
    }

    async fn put(&self, record: T) -> Result<(), StoreError> {
        self.inner.write().await.insert(record);
        Ok(())
    }

    async fn put_many(&self, records: Vec<T>) -> Result<(), StoreError> {
        let mut g = self.inner.write().await;
        for record in records {
            g.insert(record);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.remove(key).is_some())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync),
        replacement: Option<T>,
    ) -> Result<bool, StoreError> {
        let mut g = self.inner.write().await;
        if !g.get(key).map(expected).unwrap_or(false) {
            return Ok(false);
        }
        g.remove(key);
        if let Some(record) = replacement {
            g.insert(record);
        }
        Ok(true)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.inner.write().await.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read().await.len())
    }

    async fn find_by(&self, index: &str, value: &str) -> Result<Vec<T>, StoreError> {
        self.inner.read().await.find_by(index, value)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::{ContactDraft, ContactOutcome, ContactType, LocalContact, RemoteContact};

    fn contact(local_id: &str, voter_id: &str) -> LocalContact {
        let draft = ContactDraft {
            voter_id: voter_id.to_string(),
            campaign_id: "c-1".to_string(),
            contact_type: ContactType::DoorKnock,
            outcome: ContactOutcome::Neutral,
            contact_date: None,
            notes: None,
        };
        LocalContact::from_draft(draft, local_id.to_string(), Utc::now())
    }

    #[tokio::test]
    async fn test_index_follows_updates() {
        let store: MemoryStore<LocalContact> = MemoryStore::new();
        let mut c = contact("local_1_a", "v-1");
        store.put(c.clone()).await.unwrap();
        store.put(contact("local_2_b", "v-2")).await.unwrap();

        assert_eq!(store.find_by("synced", "false").await.unwrap().len(), 2);

        c.mark_synced(&RemoteContact {
            id: "srv-1".to_string(),
            voter_id: None,
            campaign_id: None,
            contact_type: None,
            outcome: None,
            contact_date: None,
            notes: None,
        });
        store.put(c).await.unwrap();

        let unsynced = store.find_by("synced", "false").await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].voter_id, "v-2");
        assert_eq!(store.find_by("synced", "true").await.unwrap().len(), 1);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store: MemoryStore<LocalContact> = MemoryStore::new();
        store.put(contact("local_1_a", "v-1")).await.unwrap();
        assert!(store.delete("local_1_a").await.unwrap());
        assert!(!store.delete("local_1_a").await.unwrap());
        assert!(store.find_by("voterId", "v-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_compare_and_swap_only_replaces_expected_record() {
        let store: MemoryStore<LocalContact> = MemoryStore::new();
        let original = contact("local_1_a", "v-1");
        store.put(original.clone()).await.unwrap();

        let mut edited = original.clone();
        edited.notes = Some("edited".to_string());
        store.put(edited.clone()).await.unwrap();

        let stale = original.clone();
        let swapped = store
            .compare_and_swap("local_1_a", &|c: &LocalContact| *c == stale, None)
            .await
            .unwrap();
        assert!(!swapped);
        assert_eq!(store.get("local_1_a").await.unwrap(), Some(edited.clone()));

        let mut synced = edited.clone();
        synced.synced = true;
        let swapped = store
            .compare_and_swap("local_1_a", &|c: &LocalContact| *c == edited, Some(synced))
            .await
            .unwrap();
        assert!(swapped);
        assert_eq!(store.find_by("synced", "true").await.unwrap().len(), 1);
        assert!(!store
            .compare_and_swap("missing", &|_: &LocalContact| true, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_unknown_index_is_rejected() {
        let store: MemoryStore<LocalContact> = MemoryStore::new();
        let err = store.find_by("outcome", "NEUTRAL").await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownIndex { collection: "contacts", .. }));
    }

    #[tokio::test]
    async fn test_created_at_index_sorts_in_time_order() {
        let base = Utc::now();
        let mut a = contact("local_b", "v-1");
        a.created_at = base + Duration::seconds(10);
        let mut b = contact("local_a", "v-1");
        b.created_at = base;

        let values = [a.index_value("createdAt").unwrap(), b.index_value("createdAt").unwrap()];
        assert!(values[1] < values[0]);
    }
}
