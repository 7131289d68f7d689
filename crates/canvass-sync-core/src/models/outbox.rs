//! Outbox entries awaiting server confirmation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sortable_timestamp;
use crate::store::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncItemType {
    Contact,
}

impl SyncItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncItemType::Contact => "contact",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }
}

/// A mutation not yet confirmed by the server.
///
/// `id` equals the local identifier of the record it came from and `data`
/// is a full snapshot of that record at enqueue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSyncItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SyncItemType,
    pub action: SyncAction,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    /// Error from the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Record for PendingSyncItem {
    const COLLECTION: &'static str = "pendingSync";
    const INDEXES: &'static [&'static str] = &["type", "action", "createdAt"];

    fn key(&self) -> String {
        self.id.clone()
    }

    fn index_value(&self, index: &str) -> Option<String> {
        match index {
            "type" => Some(self.kind.as_str().to_string()),
            "action" => Some(self.action.as_str().to_string()),
            "createdAt" => Some(sortable_timestamp(&self.created_at)),
            _ => None,
        }
    }
}

/// An outbox item abandoned after exhausting its retries, kept for
/// manual recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub id: String,
    pub item: PendingSyncItem,
    pub abandoned_at: DateTime<Utc>,
}

impl Record for DeadLetter {
    const COLLECTION: &'static str = "deadLetters";
    const INDEXES: &'static [&'static str] = &["type"];

    fn key(&self) -> String {
        self.id.clone()
    }

    fn index_value(&self, index: &str) -> Option<String> {
        match index {
            "type" => Some(self.item.kind.as_str().to_string()),
            _ => None,
        }
    }
}
