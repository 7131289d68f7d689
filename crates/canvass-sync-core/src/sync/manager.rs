//! Sync manager for the contact outbox.
//!
//! Every contact is written locally first. Online, the manager submits it
//! right away; offline (or when that submission fails) it leaves a
//! [`PendingSyncItem`] that a later drain replays in creation order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{DrainReport, SyncError};
use crate::api::ContactsApi;
use crate::clock::Clock;
use crate::config::{RetryExhaustion, SyncSettings};
use crate::connectivity::ConnectivityProbe;
use crate::models::{
    generate_local_id, CachedVoter, ContactDraft, ContactPayload, DeadLetter, LocalContact,
    PendingSyncItem, RemoteContact, SyncAction, SyncItemType,
};
use crate::store::{LocalDatabase, Record};
use crate::worker::ClientMessage;

/// Compare-and-swap rounds before reconciliation gives up on a contact.
const RECONCILE_ATTEMPTS: usize = 8;

pub struct SyncManager {
    db: LocalDatabase,
    api: Arc<dyn ContactsApi>,
    connectivity: Arc<dyn ConnectivityProbe>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    is_online: AtomicBool,
    // Held for the whole drain; a second caller that cannot take it skips.
    drain_lock: Mutex<()>,
}

impl SyncManager {
    pub fn new(
        db: LocalDatabase,
        api: Arc<dyn ContactsApi>,
        connectivity: Arc<dyn ConnectivityProbe>,
        clock: Arc<dyn Clock>,
        settings: SyncSettings,
    ) -> Self {
        let online = connectivity.is_online();
        Self {
            db,
            api,
            connectivity,
            clock,
            settings,
            is_online: AtomicBool::new(online),
            drain_lock: Mutex::new(()),
        }
    }

    pub fn database(&self) -> &LocalDatabase {
        &self.db
    }

    pub fn is_online(&self) -> bool {
        self.is_online.load(Ordering::SeqCst)
    }

    /// Mirror a connectivity transition. Returns the previous state.
    pub fn set_online(&self, online: bool) -> bool {
        self.is_online.swap(online, Ordering::SeqCst)
    }

    // ===== Contacts =====

    /// Record a contact locally and get it to the server when possible.
    ///
    /// The local write always happens and its failure is returned. A failed
    /// online submission is not an error: the contact is queued instead.
    pub async fn create_offline_contact(
        &self,
        draft: ContactDraft,
    ) -> Result<LocalContact, SyncError> {
        let now = self.clock.now();
        let local_id = generate_local_id(now);
        let contact = LocalContact::from_draft(draft, local_id, now);
        self.db.contacts().put(contact.clone()).await?;

        if self.is_online() {
            match self.sync_contact(&contact).await {
                Ok(synced) => return Ok(synced),
                Err(e) => {
                    warn!(local_id = %contact.key(), error = %e, "Immediate sync failed, queueing contact");
                }
            }
        }

        self.enqueue(SyncAction::Create, contact.key(), &contact).await?;
        debug!(local_id = %contact.key(), voter_id = %contact.voter_id, "Contact queued for sync");
        Ok(contact)
    }

    /// Submit a contact and reconcile the local copy with the server's
    /// answer. The queued creation, if any, is removed.
    ///
    /// A contact the store already holds as synced is not submitted again.
    /// Edits saved while the request was in flight keep the stored copy
    /// unsynced.
    pub async fn sync_contact(&self, contact: &LocalContact) -> Result<LocalContact, SyncError> {
        let key = contact.key();
        let stored = self.db.contacts().get(&key).await?;

        if let Some(existing) = stored.as_ref().filter(|c| c.synced && c.id.is_some()) {
            debug!(local_id = %key, "Contact already synced");
            self.drop_creation(&key).await?;
            return Ok(existing.clone());
        }

        let submitted = contact.payload();
        let remote = self.api.create_contact(&submitted).await?;
        let reconciled = match self.reconcile(&key, &submitted, &remote).await? {
            Some(current) => current,
            None if stored.is_none() => {
                let mut created = contact.clone();
                created.mark_synced(&remote);
                self.db.contacts().put(created.clone()).await?;
                created
            }
            None => {
                // Deleted locally while the creation was in flight.
                let mut orphan = contact.clone();
                orphan.mark_synced(&remote);
                let id = format!("{}:{}", key, SyncAction::Delete.as_str());
                self.enqueue(SyncAction::Delete, id, &orphan).await?;
                warn!(local_id = %key, id = %remote.id, "Contact deleted during sync, queued server delete");
                orphan
            }
        };
        self.drop_creation(&key).await?;

        info!(local_id = %key, id = %remote.id, synced = reconciled.synced, "Contact synced");
        Ok(reconciled)
    }

    /// Record the server's id on the stored contact, marking it synced only
    /// if its content is still what was submitted. Returns `None` when the
    /// contact is no longer stored.
    async fn reconcile(
        &self,
        key: &str,
        submitted: &ContactPayload,
        remote: &RemoteContact,
    ) -> Result<Option<LocalContact>, SyncError> {
        for _ in 0..RECONCILE_ATTEMPTS {
            let Some(stored) = self.db.contacts().get(key).await? else {
                return Ok(None);
            };
            let mut next = stored.clone();
            next.id = Some(remote.id.clone());
            next.synced = stored.payload() == *submitted;
            if next == stored {
                return Ok(Some(stored));
            }
            let unchanged = |c: &LocalContact| *c == stored;
            if self
                .db
                .contacts()
                .compare_and_swap(key, &unchanged, Some(next.clone()))
                .await?
            {
                if !next.synced {
                    debug!(local_id = %key, "Contact edited during sync, left unsynced");
                }
                return Ok(Some(next));
            }
        }
        Err(SyncError::Contended { key: key.to_string() })
    }

    /// Remove the queued creation of `key`. Later edits travel as their own
    /// update items, so once the server holds the record the creation is
    /// spent.
    async fn drop_creation(&self, key: &str) -> Result<bool, SyncError> {
        let creation = |p: &PendingSyncItem| p.action == SyncAction::Create;
        Ok(self.db.pending().compare_and_swap(key, &creation, None).await?)
    }

    /// Remove `item` from the outbox unless it was replaced after being read.
    async fn settle(&self, item: &PendingSyncItem) -> Result<bool, SyncError> {
        let replayed = |p: &PendingSyncItem| p.created_at == item.created_at && p.data == item.data;
        let settled = self.db.pending().compare_and_swap(&item.id, &replayed, None).await?;
        if !settled {
            debug!(id = %item.id, "Outbox item replaced during replay, keeping the newer one");
        }
        Ok(settled)
    }

    /// Save an edited contact and queue the change for the server.
    pub async fn queue_update(&self, mut contact: LocalContact) -> Result<LocalContact, SyncError> {
        contact.synced = false;
        self.db.contacts().put(contact.clone()).await?;
        let id = format!("{}:{}", contact.key(), SyncAction::Update.as_str());
        self.enqueue(SyncAction::Update, id, &contact).await?;
        Ok(contact)
    }

    /// Remove a contact locally and queue the deletion for the server.
    ///
    /// A contact the server never saw only loses its queued creation.
    /// Returns whether the contact existed.
    pub async fn queue_delete(&self, key: &str) -> Result<bool, SyncError> {
        let Some(contact) = self.db.contacts().get(key).await? else {
            return Ok(false);
        };
        self.db.contacts().delete(key).await?;

        if contact.id.is_none() {
            self.db.pending().delete(key).await?;
            let update = format!("{}:{}", key, SyncAction::Update.as_str());
            self.db.pending().delete(&update).await?;
            debug!(local_id = %key, "Dropped unsent contact");
            return Ok(true);
        }

        let id = format!("{}:{}", key, SyncAction::Delete.as_str());
        self.enqueue(SyncAction::Delete, id, &contact).await?;
        Ok(true)
    }

    async fn enqueue(
        &self,
        action: SyncAction,
        id: String,
        contact: &LocalContact,
    ) -> Result<PendingSyncItem, SyncError> {
        let item = PendingSyncItem {
            id,
            kind: SyncItemType::Contact,
            action,
            data: serde_json::to_value(contact)?,
            created_at: self.clock.now(),
            retry_count: 0,
            last_error: None,
        };
        self.db.pending().put(item.clone()).await?;
        Ok(item)
    }

    // ===== Outbox =====

    /// Replay the outbox oldest-first.
    ///
    /// Only one drain runs at a time; a concurrent call, or a call while
    /// offline, returns a skipped report. Per-item failures are counted,
    /// not returned.
    pub async fn sync_pending_data(&self) -> Result<DrainReport, SyncError> {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            debug!("Drain already in progress");
            return Ok(DrainReport::skipped());
        };
        if !self.is_online() {
            debug!("Offline, not draining");
            return Ok(DrainReport::skipped());
        }

        let mut items = self.db.pending().all().await?;
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut report = DrainReport::default();
        for item in items {
            if item.retry_count >= self.settings.max_retries {
                match self.abandon(item).await {
                    Ok(true) => report.abandoned += 1,
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "Failed to abandon outbox item"),
                }
                continue;
            }

            match self.replay(&item).await {
                Ok(()) => report.synced += 1,
                Err(e) => {
                    report.failed += 1;
                    let mut retried = item.clone();
                    retried.retry_count += 1;
                    retried.last_error = Some(e.to_string());
                    warn!(id = %item.id, retry = retried.retry_count, error = %e, "Outbox item failed");
                    let unchanged = |p: &PendingSyncItem| *p == item;
                    if let Err(e) = self
                        .db
                        .pending()
                        .compare_and_swap(&item.id, &unchanged, Some(retried))
                        .await
                    {
                        warn!(error = %e, "Failed to record outbox retry");
                    }
                }
            }
        }

        info!(
            synced = report.synced,
            failed = report.failed,
            abandoned = report.abandoned,
            "Outbox drained"
        );
        Ok(report)
    }

    async fn replay(&self, item: &PendingSyncItem) -> Result<(), SyncError> {
        let snapshot: LocalContact =
            serde_json::from_value(item.data.clone()).map_err(|e| SyncError::InvalidPayload {
                id: item.id.clone(),
                reason: e.to_string(),
            })?;

        match item.action {
            SyncAction::Create => {
                self.sync_contact(&snapshot).await?;
            }
            SyncAction::Update => {
                let key = snapshot.key();
                let stored = self.db.contacts().get(&key).await?;
                let server_id = snapshot
                    .id
                    .clone()
                    .or_else(|| stored.as_ref().and_then(|c| c.id.clone()))
                    .ok_or_else(|| SyncError::InvalidPayload {
                        id: item.id.clone(),
                        reason: "contact has no server id yet".to_string(),
                    })?;
                let submitted = snapshot.payload();
                let remote = self.api.update_contact(&server_id, &submitted).await?;
                self.reconcile(&key, &submitted, &remote).await?;
                self.settle(item).await?;
            }
            SyncAction::Delete => {
                let server_id = snapshot.id.clone().ok_or_else(|| SyncError::InvalidPayload {
                    id: item.id.clone(),
                    reason: "contact has no server id".to_string(),
                })?;
                self.api.delete_contact(&server_id).await?;
                self.settle(item).await?;
            }
        }
        Ok(())
    }

    /// Take an exhausted item out of the outbox. An item replaced since it
    /// was read is left for the next drain.
    async fn abandon(&self, item: PendingSyncItem) -> Result<bool, SyncError> {
        let unchanged = |p: &PendingSyncItem| *p == item;
        if !self.db.pending().compare_and_swap(&item.id, &unchanged, None).await? {
            return Ok(false);
        }
        match self.settings.on_retry_exhausted {
            RetryExhaustion::DeadLetter => {
                warn!(id = %item.id, retries = item.retry_count, "Moving outbox item to dead letters");
                let letter = DeadLetter {
                    id: item.id.clone(),
                    item: item.clone(),
                    abandoned_at: self.clock.now(),
                };
                if let Err(e) = self.db.dead_letters().put(letter).await {
                    self.db.pending().put(item).await?;
                    return Err(e.into());
                }
            }
            RetryExhaustion::Discard => {
                warn!(id = %item.id, retries = item.retry_count, "Discarding outbox item");
            }
        }
        Ok(true)
    }

    pub async fn get_pending_sync_count(&self) -> Result<usize, SyncError> {
        Ok(self.db.pending().count().await?)
    }

    /// Abandoned items, oldest first.
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, SyncError> {
        let mut letters = self.db.dead_letters().all().await?;
        letters.sort_by(|a, b| a.abandoned_at.cmp(&b.abandoned_at));
        Ok(letters)
    }

    /// Put a dead letter back in the outbox with a fresh retry budget.
    /// Returns whether it existed.
    pub async fn requeue_dead_letter(&self, id: &str) -> Result<bool, SyncError> {
        let Some(letter) = self.db.dead_letters().get(id).await? else {
            return Ok(false);
        };
        let mut item = letter.item;
        item.retry_count = 0;
        item.last_error = None;
        self.db.pending().put(item).await?;
        self.db.dead_letters().delete(id).await?;
        info!(id, "Requeued dead letter");
        Ok(true)
    }

    /// Wipe all local data. Used on logout.
    pub async fn clear_cache(&self) -> Result<(), SyncError> {
        Ok(self.db.clear_all().await?)
    }

    // ===== Voters =====

    /// Refresh the voter mirror when online, then read it back. A failed
    /// refresh falls back to whatever is cached.
    pub async fn load_voters(&self, campaign_id: &str) -> Result<Vec<CachedVoter>, SyncError> {
        if self.is_online() {
            match self.api.list_voters(campaign_id).await {
                Ok(voters) => {
                    self.db.cache_voters(campaign_id, voters, self.clock.now()).await?;
                }
                Err(e) => warn!(campaign_id, error = %e, "Voter refresh failed, using cache"),
            }
        }
        Ok(self.db.get_cached_voters(campaign_id).await?)
    }

    // ===== Background glue =====

    /// Mirror the connectivity probe and drain on every offline→online
    /// transition.
    pub fn watch_connectivity(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut rx = self.connectivity.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                let was_online = manager.set_online(online);
                if online && !was_online {
                    info!("Back online, draining outbox");
                    if let Err(e) = manager.sync_pending_data().await {
                        warn!(error = %e, "Drain after reconnect failed");
                    }
                }
            }
        })
    }

    /// Drain whenever the cache controller asks the page to.
    pub fn listen(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<ClientMessage>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = manager.handle_client_message(message).await {
                    warn!(error = %e, "Requested drain failed");
                }
            }
        })
    }

    pub async fn handle_client_message(&self, message: ClientMessage) -> Result<DrainReport, SyncError> {
        match message {
            ClientMessage::SyncPendingContacts => self.sync_pending_data().await,
        }
    }
}
