//! Implicit contact logging with short-window deduplication.
//!
//! UI actions such as "start a call" log a contact as a side effect. The
//! [`ContactRecorder`] does that best-effort: a repeat of the same voter and
//! contact type inside the window is skipped, location is attached when it
//! can be found quickly, and no failure ever reaches the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::ContactsApi;
use crate::clock::Clock;
use crate::config::DedupSettings;
use crate::models::{ContactOutcome, ContactPayload, ContactType, DeviceLocation, RemoteContact};

/// Remembers recent `(voter, contact type)` recordings.
///
/// Entries older than the window are pruned whenever a new one is marked;
/// there is no timer.
pub struct DedupGuard {
    window: chrono::Duration,
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl DedupGuard {
    pub fn new(window: chrono::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            clock,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn key(voter_id: &str, contact_type: ContactType) -> String {
        format!("{}:{}", voter_id, contact_type.as_str())
    }

    pub fn is_duplicate(&self, voter_id: &str, contact_type: ContactType) -> bool {
        let now = self.clock.now();
        self.records
            .lock()
            .get(&Self::key(voter_id, contact_type))
            .map(|at| now - *at < self.window)
            .unwrap_or(false)
    }

    pub fn mark_recorded(&self, voter_id: &str, contact_type: ContactType) {
        let now = self.clock.now();
        let mut records = self.records.lock();
        records.retain(|_, at| now - *at < self.window);
        records.insert(Self::key(voter_id, contact_type), now);
    }

    /// Check and mark in one step. Returns `false` when the pair is already
    /// inside the window, otherwise claims it for the caller.
    pub fn try_reserve(&self, voter_id: &str, contact_type: ContactType) -> bool {
        let now = self.clock.now();
        let mut records = self.records.lock();
        records.retain(|_, at| now - *at < self.window);
        let key = Self::key(voter_id, contact_type);
        if records.contains_key(&key) {
            return false;
        }
        records.insert(key, now);
        true
    }

    /// Give back a reservation whose recording did not happen.
    pub fn release(&self, voter_id: &str, contact_type: ContactType) {
        self.records.lock().remove(&Self::key(voter_id, contact_type));
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Location
// ============================================================================

#[derive(Error, Debug)]
pub enum LocationError {
    #[error("Location unavailable: {0}")]
    Unavailable(String),

    #[error("Location permission denied")]
    PermissionDenied,
}

/// One-shot device position lookup, including any reverse-geocoded address.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_location(&self) -> Result<DeviceLocation, LocationError>;
}

/// Wraps a provider with a lookup timeout and a cache of the last good fix.
/// Failures are not cached, so the next call tries again.
pub struct CachedLocation {
    provider: Arc<dyn LocationProvider>,
    timeout: Duration,
    max_age: chrono::Duration,
    clock: Arc<dyn Clock>,
    last: Mutex<Option<(DateTime<Utc>, DeviceLocation)>>,
}

impl CachedLocation {
    pub fn new(provider: Arc<dyn LocationProvider>, settings: &DedupSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider,
            timeout: settings.location_timeout(),
            max_age: settings.location_max_age(),
            clock,
            last: Mutex::new(None),
        }
    }

    pub async fn get(&self) -> Option<DeviceLocation> {
        let now = self.clock.now();
        let fresh = self
            .last
            .lock()
            .as_ref()
            .filter(|(at, _)| now - *at < self.max_age)
            .map(|(_, location)| location.clone());
        if fresh.is_some() {
            return fresh;
        }

        match tokio::time::timeout(self.timeout, self.provider.current_location()).await {
            Ok(Ok(location)) => {
                *self.last.lock() = Some((self.clock.now(), location.clone()));
                Some(location)
            }
            Ok(Err(e)) => {
                debug!(error = %e, "No device location");
                None
            }
            Err(_) => {
                debug!(timeout_ms = self.timeout.as_millis() as u64, "Device location timed out");
                None
            }
        }
    }
}

// ============================================================================
// Query invalidation
// ============================================================================

/// A cached query that is stale after a contact was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryInvalidation {
    /// Contact lists that include this voter.
    Contacts { voter_id: String },
    /// The voter's own detail view.
    Voter { voter_id: String },
}

pub trait QueryInvalidator: Send + Sync {
    fn invalidate(&self, query: QueryInvalidation);
}

/// Publishes invalidations to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastInvalidator {
    tx: broadcast::Sender<QueryInvalidation>,
}

impl BroadcastInvalidator {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueryInvalidation> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastInvalidator {
    fn default() -> Self {
        Self::new(64)
    }
}

impl QueryInvalidator for BroadcastInvalidator {
    fn invalidate(&self, query: QueryInvalidation) {
        // An error only means nobody is listening.
        if self.tx.send(query).is_err() {
            debug!("No invalidation subscribers");
        }
    }
}

// ============================================================================
// Recorder
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RecordContactOptions {
    pub voter_id: String,
    pub campaign_id: String,
    pub contact_type: ContactType,
    pub outcome: ContactOutcome,
    pub notes: Option<String>,
}

impl RecordContactOptions {
    pub fn new(voter_id: &str, campaign_id: &str, contact_type: ContactType) -> Self {
        Self {
            voter_id: voter_id.to_string(),
            campaign_id: campaign_id.to_string(),
            contact_type,
            outcome: ContactOutcome::default(),
            notes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Recorded(RemoteContact),
    /// Same voter and type were recorded inside the window.
    Duplicate,
    /// The server call failed. Logged and otherwise ignored.
    Failed,
}

pub struct ContactRecorder {
    api: Arc<dyn ContactsApi>,
    guard: DedupGuard,
    location: Option<CachedLocation>,
    invalidator: Arc<dyn QueryInvalidator>,
    clock: Arc<dyn Clock>,
}

impl ContactRecorder {
    pub fn new(
        api: Arc<dyn ContactsApi>,
        settings: &DedupSettings,
        invalidator: Arc<dyn QueryInvalidator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            api,
            guard: DedupGuard::new(settings.window(), clock.clone()),
            location: None,
            invalidator,
            clock,
        }
    }

    pub fn with_location(mut self, location: CachedLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn guard(&self) -> &DedupGuard {
        &self.guard
    }

    /// Log a contact as a side effect of another action. Never fails.
    ///
    /// The pair is reserved before the server call, so a concurrent repeat
    /// is reported as a duplicate rather than logged twice.
    pub async fn record_contact(&self, options: RecordContactOptions) -> RecordOutcome {
        if !self.guard.try_reserve(&options.voter_id, options.contact_type) {
            debug!(
                voter_id = %options.voter_id,
                contact_type = options.contact_type.as_str(),
                "Skipping duplicate contact log"
            );
            return RecordOutcome::Duplicate;
        }

        let location = match &self.location {
            Some(location) => location.get().await,
            None => None,
        };

        let payload = ContactPayload {
            voter_id: options.voter_id.clone(),
            campaign_id: options.campaign_id,
            contact_type: options.contact_type,
            outcome: options.outcome,
            contact_date: self.clock.now(),
            notes: options.notes,
            location,
        };

        match self.api.create_contact(&payload).await {
            Ok(remote) => {
                self.guard.mark_recorded(&options.voter_id, options.contact_type);
                self.invalidator.invalidate(QueryInvalidation::Contacts {
                    voter_id: options.voter_id.clone(),
                });
                self.invalidator.invalidate(QueryInvalidation::Voter {
                    voter_id: options.voter_id.clone(),
                });
                info!(voter_id = %options.voter_id, id = %remote.id, "Contact logged");
                RecordOutcome::Recorded(remote)
            }
            Err(e) => {
                self.guard.release(&options.voter_id, options.contact_type);
                warn!(voter_id = %options.voter_id, error = %e, "Failed to log contact");
                RecordOutcome::Failed
            }
        }
    }
}
