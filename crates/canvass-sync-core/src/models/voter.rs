//! Read-only voter records mirrored from the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Record;

/// A voter's recorded position towards the campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stance {
    Supporter,
    LeaningSupport,
    Undecided,
    LeaningOppose,
    Opposed,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Voter as returned by the voter listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voter {
    pub id: String,
    pub campaign_id: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub stance: Stance,
    #[serde(default)]
    pub influence_score: f64,
}

/// A voter as held on-device. Replaced wholesale on every re-cache,
/// never edited locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedVoter {
    pub id: String,
    pub campaign_id: String,
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub stance: Stance,
    pub influence_score: f64,
    pub synced_at: DateTime<Utc>,
}

impl CachedVoter {
    pub fn from_voter(voter: Voter, synced_at: DateTime<Utc>) -> Self {
        Self {
            id: voter.id,
            campaign_id: voter.campaign_id,
            name: voter.name,
            phone: voter.phone,
            address: voter.address,
            stance: voter.stance,
            influence_score: voter.influence_score,
            synced_at,
        }
    }

    pub fn into_voter(self) -> Voter {
        Voter {
            id: self.id,
            campaign_id: self.campaign_id,
            name: self.name,
            phone: self.phone,
            address: self.address,
            stance: self.stance,
            influence_score: self.influence_score,
        }
    }
}

impl Record for CachedVoter {
    const COLLECTION: &'static str = "voters";
    const INDEXES: &'static [&'static str] = &["campaignId"];

    fn key(&self) -> String {
        self.id.clone()
    }

    fn index_value(&self, index: &str) -> Option<String> {
        match index {
            "campaignId" => Some(self.campaign_id.clone()),
            _ => None,
        }
    }
}
