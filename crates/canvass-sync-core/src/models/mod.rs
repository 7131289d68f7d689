//! Data models for the offline contact subsystem.
//!
//! - `CachedVoter`, `Voter`: read-only voter mirror and its server shape
//! - `LocalContact`, `ContactDraft`, `ContactPayload`: contact events in
//!   their local, user-entered and wire forms
//! - `PendingSyncItem`, `DeadLetter`: outbox entries and abandoned ones

pub mod contact;
pub mod outbox;
pub mod voter;

pub use contact::{
    generate_local_id, ContactDraft, ContactOutcome, ContactPayload, ContactType, DeviceLocation,
    LocalContact, RemoteContact,
};
pub use outbox::{DeadLetter, PendingSyncItem, SyncAction, SyncItemType};
pub use voter::{CachedVoter, Stance, Voter};

/// Index values for timestamps must sort lexically in time order.
pub(crate) fn sortable_timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
