use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{JsonFileStore, MemoryStore, Store, StoreError};
use crate::models::{CachedVoter, DeadLetter, LocalContact, PendingSyncItem, Voter};

/// Name of the on-device database.
pub const DATABASE_NAME: &str = "canvass-offline";

/// Bump when a collection's record layout changes incompatibly.
pub const DATABASE_VERSION: u32 = 1;

/// The on-device database: cached voters, local contacts, the outbox and
/// abandoned outbox items.
///
/// Clone is cheap - every collection sits behind an `Arc`.
#[derive(Clone)]
pub struct LocalDatabase {
    voters: Arc<dyn Store<CachedVoter>>,
    contacts: Arc<dyn Store<LocalContact>>,
    pending: Arc<dyn Store<PendingSyncItem>>,
    dead_letters: Arc<dyn Store<DeadLetter>>,
}

impl LocalDatabase {
    pub fn new(
        voters: Arc<dyn Store<CachedVoter>>,
        contacts: Arc<dyn Store<LocalContact>>,
        pending: Arc<dyn Store<PendingSyncItem>>,
        dead_letters: Arc<dyn Store<DeadLetter>>,
    ) -> Self {
        Self {
            voters,
            contacts,
            pending,
            dead_letters,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::<CachedVoter>::new()),
            Arc::new(MemoryStore::<LocalContact>::new()),
            Arc::new(MemoryStore::<PendingSyncItem>::new()),
            Arc::new(MemoryStore::<DeadLetter>::new()),
        )
    }

    /// Open the file-backed database under `<dir>/<name>.v<version>/`.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let db_dir = dir.join(format!("{}.v{}", DATABASE_NAME, DATABASE_VERSION));
        info!(path = %db_dir.display(), "Opening local database");
        Ok(Self::new(
            Arc::new(JsonFileStore::<CachedVoter>::open(&db_dir)?),
            Arc::new(JsonFileStore::<LocalContact>::open(&db_dir)?),
            Arc::new(JsonFileStore::<PendingSyncItem>::open(&db_dir)?),
            Arc::new(JsonFileStore::<DeadLetter>::open(&db_dir)?),
        ))
    }

    pub fn voters(&self) -> &dyn Store<CachedVoter> {
        self.voters.as_ref()
    }

    pub fn contacts(&self) -> &dyn Store<LocalContact> {
        self.contacts.as_ref()
    }

    pub fn pending(&self) -> &dyn Store<PendingSyncItem> {
        self.pending.as_ref()
    }

    pub fn dead_letters(&self) -> &dyn Store<DeadLetter> {
        self.dead_letters.as_ref()
    }

    /// Upsert a freshly fetched voter list, stamping every record with the
    /// same `synced_at`.
    pub async fn cache_voters(
        &self,
        campaign_id: &str,
        voters: Vec<Voter>,
        synced_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let cached: Vec<CachedVoter> = voters
            .into_iter()
            .map(|voter| {
                let mut cached = CachedVoter::from_voter(voter, synced_at);
                cached.campaign_id = campaign_id.to_string();
                cached
            })
            .collect();
        let count = cached.len();
        self.voters.put_many(cached).await?;
        debug!(campaign_id, count, "Cached voters");
        Ok(count)
    }

    pub async fn get_cached_voters(&self, campaign_id: &str) -> Result<Vec<CachedVoter>, StoreError> {
        self.voters.find_by("campaignId", campaign_id).await
    }

    /// Wipe every collection. Used on logout or session reset.
    pub async fn clear_all(&self) -> Result<(), StoreError> {
        self.voters.clear().await?;
        self.contacts.clear().await?;
        self.pending.clear().await?;
        self.dead_letters.clear().await?;
        info!("Cleared local database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Stance;

    fn voter(id: &str, name: &str) -> Voter {
        Voter {
            id: id.to_string(),
            campaign_id: "ignored".to_string(),
            name: name.to_string(),
            phone: Some("5551234567".to_string()),
            address: None,
            stance: Stance::Undecided,
            influence_score: 3.0,
        }
    }

    #[tokio::test]
    async fn test_cache_voters_supersedes_previous_copy() {
        let db = LocalDatabase::in_memory();
        let first = Utc::now();
        let second = first + chrono::Duration::minutes(5);
        db.cache_voters("c-1", vec![voter("v-1", "Old Name"), voter("v-2", "Bea")], first)
            .await
            .unwrap();
        db.cache_voters("c-1", vec![voter("v-1", "New Name")], second)
            .await
            .unwrap();
        db.cache_voters("c-2", vec![voter("v-3", "Caio")], second)
            .await
            .unwrap();

        let cached = db.get_cached_voters("c-1").await.unwrap();
        assert_eq!(cached.len(), 2);
        assert_eq!(cached[0].name, "New Name");
        assert!(cached.iter().all(|v| v.campaign_id == "c-1"));
        assert_eq!(cached[0].synced_at, second);
        assert_eq!(cached[1].synced_at, first);
        assert_eq!(db.get_cached_voters("c-2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_all_wipes_every_collection() {
        let dir = tempfile::tempdir().unwrap();
        let db = LocalDatabase::open(dir.path()).unwrap();
        db.cache_voters("c-1", vec![voter("v-1", "Ana")], Utc::now())
            .await
            .unwrap();
        db.clear_all().await.unwrap();
        assert_eq!(db.voters().count().await.unwrap(), 0);
        assert!(dir.path().join("canvass-offline.v1").join("voters.json").exists());
    }
}
