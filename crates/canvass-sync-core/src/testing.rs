//! In-process fakes shared by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::api::{ApiError, ContactsApi};
use crate::models::{ContactPayload, RemoteContact, Voter};

/// Scriptable `ContactsApi`: records every call, can fail on demand, and
/// can hold create and update calls at a gate until the test releases them.
#[derive(Default)]
pub(crate) struct FakeContactsApi {
    failing: AtomicBool,
    attempts: AtomicUsize,
    update_attempts: AtomicUsize,
    next_id: AtomicUsize,
    created: Mutex<Vec<ContactPayload>>,
    updated: Mutex<Vec<(String, ContactPayload)>>,
    deleted: Mutex<Vec<String>>,
    voters: Mutex<Vec<Voter>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeContactsApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hold every subsequent create or update call until permits are added.
    pub fn gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn set_voters(&self, voters: Vec<Voter>) {
        *self.voters.lock() = voters;
    }

    /// Create calls started, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<ContactPayload> {
        self.created.lock().clone()
    }

    pub fn updated(&self) -> Vec<(String, ContactPayload)> {
        self.updated.lock().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    /// Update calls started, successful or not.
    pub fn update_attempts(&self) -> usize {
        self.update_attempts.load(Ordering::SeqCst)
    }

    async fn pass_gate(&self) {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }

    fn check(&self) -> Result<(), ApiError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(ApiError::ServerError("unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContactsApi for FakeContactsApi {
    async fn create_contact(&self, payload: &ContactPayload) -> Result<RemoteContact, ApiError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        self.check()?;
        self.created.lock().push(payload.clone());
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RemoteContact {
            id: format!("srv-{}", n),
            voter_id: Some(payload.voter_id.clone()),
            campaign_id: Some(payload.campaign_id.clone()),
            contact_type: Some(payload.contact_type),
            outcome: Some(payload.outcome),
            contact_date: Some(payload.contact_date),
            notes: payload.notes.clone(),
        })
    }

    async fn update_contact(
        &self,
        id: &str,
        payload: &ContactPayload,
    ) -> Result<RemoteContact, ApiError> {
        self.update_attempts.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        self.check()?;
        self.updated.lock().push((id.to_string(), payload.clone()));
        Ok(RemoteContact {
            id: id.to_string(),
            voter_id: Some(payload.voter_id.clone()),
            campaign_id: Some(payload.campaign_id.clone()),
            contact_type: Some(payload.contact_type),
            outcome: Some(payload.outcome),
            contact_date: Some(payload.contact_date),
            notes: payload.notes.clone(),
        })
    }

    async fn delete_contact(&self, id: &str) -> Result<(), ApiError> {
        self.check()?;
        self.deleted.lock().push(id.to_string());
        Ok(())
    }

    async fn list_voters(&self, _campaign_id: &str) -> Result<Vec<Voter>, ApiError> {
        self.check()?;
        Ok(self.voters.lock().clone())
    }
}

/// Poll `condition` until it holds, yielding to spawned tasks in between.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}
