//! Voter-contact events.

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

use super::sortable_timestamp;
use crate::store::Record;

/// Length of the random suffix in a local identifier.
const LOCAL_ID_SUFFIX_LEN: usize = 9;

/// Prefix marking identifiers that were minted on-device.
pub const LOCAL_ID_PREFIX: &str = "local_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContactType {
    PhoneCall,
    Sms,
    #[serde(rename = "WHATSAPP")]
    WhatsApp,
    Email,
    DoorKnock,
    Meeting,
    Other,
}

impl ContactType {
    /// Wire name, also used to build dedup keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactType::PhoneCall => "PHONE_CALL",
            ContactType::Sms => "SMS",
            ContactType::WhatsApp => "WHATSAPP",
            ContactType::Email => "EMAIL",
            ContactType::DoorKnock => "DOOR_KNOCK",
            ContactType::Meeting => "MEETING",
            ContactType::Other => "OTHER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PHONE_CALL" | "CALL" => Some(ContactType::PhoneCall),
            "SMS" => Some(ContactType::Sms),
            "WHATSAPP" => Some(ContactType::WhatsApp),
            "EMAIL" => Some(ContactType::Email),
            "DOOR_KNOCK" => Some(ContactType::DoorKnock),
            "MEETING" => Some(ContactType::Meeting),
            "OTHER" => Some(ContactType::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContactOutcome {
    Positive,
    Neutral,
    Negative,
    NoAnswer,
    Callback,
    #[default]
    Attempted,
}

impl ContactOutcome {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "POSITIVE" => Some(ContactOutcome::Positive),
            "NEUTRAL" => Some(ContactOutcome::Neutral),
            "NEGATIVE" => Some(ContactOutcome::Negative),
            "NO_ANSWER" => Some(ContactOutcome::NoAnswer),
            "CALLBACK" => Some(ContactOutcome::Callback),
            "ATTEMPTED" => Some(ContactOutcome::Attempted),
            _ => None,
        }
    }
}

/// Best-effort position of the device when a contact was logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// What the user entered before any identifier exists.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactDraft {
    pub voter_id: String,
    pub campaign_id: String,
    pub contact_type: ContactType,
    pub outcome: ContactOutcome,
    /// Defaults to the creation time when absent.
    pub contact_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Body of `POST /contacts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPayload {
    pub voter_id: String,
    pub campaign_id: String,
    #[serde(rename = "type")]
    pub contact_type: ContactType,
    pub outcome: ContactOutcome,
    pub contact_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<DeviceLocation>,
}

/// Canonical contact as echoed back by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteContact {
    pub id: String,
    #[serde(default)]
    pub voter_id: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default, rename = "type")]
    pub contact_type: Option<ContactType>,
    #[serde(default)]
    pub outcome: Option<ContactOutcome>,
    #[serde(default)]
    pub contact_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A contact event held on-device.
///
/// `local_id` is the lookup key for anything created on this device and
/// is kept after the server assigns `id`, so a re-submission can be
/// recognised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalContact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    pub voter_id: String,
    pub campaign_id: String,
    #[serde(rename = "type")]
    pub contact_type: ContactType,
    pub outcome: ContactOutcome,
    pub contact_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub synced: bool,
    pub created_at: DateTime<Utc>,
}

impl LocalContact {
    /// Build an unsynced contact from a draft.
    pub fn from_draft(draft: ContactDraft, local_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            local_id: Some(local_id),
            voter_id: draft.voter_id,
            campaign_id: draft.campaign_id,
            contact_type: draft.contact_type,
            outcome: draft.outcome,
            contact_date: draft.contact_date.unwrap_or(now),
            notes: draft.notes,
            synced: false,
            created_at: now,
        }
    }

    pub fn payload(&self) -> ContactPayload {
        ContactPayload {
            voter_id: self.voter_id.clone(),
            campaign_id: self.campaign_id.clone(),
            contact_type: self.contact_type,
            outcome: self.outcome,
            contact_date: self.contact_date,
            notes: self.notes.clone(),
            location: None,
        }
    }

    /// Apply the server's confirmation in place.
    pub fn mark_synced(&mut self, remote: &RemoteContact) {
        self.id = Some(remote.id.clone());
        self.synced = true;
    }
}

impl Record for LocalContact {
    const COLLECTION: &'static str = "contacts";
    const INDEXES: &'static [&'static str] = &["voterId", "campaignId", "synced", "createdAt"];

    fn key(&self) -> String {
        self.local_id
            .clone()
            .or_else(|| self.id.clone())
            .unwrap_or_default()
    }

    fn index_value(&self, index: &str) -> Option<String> {
        match index {
            "voterId" => Some(self.voter_id.clone()),
            "campaignId" => Some(self.campaign_id.clone()),
            "synced" => Some(self.synced.to_string()),
            "createdAt" => Some(sortable_timestamp(&self.created_at)),
            _ => None,
        }
    }
}

/// Mint a `local_<millis>_<random>` identifier.
pub fn generate_local_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(LOCAL_ID_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}{}_{}", LOCAL_ID_PREFIX, now.timestamp_millis(), suffix)
}
