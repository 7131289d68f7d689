//! Offline-first contact sync for field canvassing.
//!
//! The crate is split the same way the running system is:
//!
//! - [`store`]: the on-device database (cached voters, local contacts,
//!   the pending-sync outbox and abandoned dead letters).
//! - [`connectivity`]: online/offline state and transitions.
//! - [`sync`]: the `SyncManager` that owns the outbox lifecycle.
//! - [`dedup`]: the short-window guard and recorder for implicit contact logs.
//! - [`worker`]: the request-intercepting `CacheController` with its three
//!   caching strategies and page bridges.
//! - [`api`]: the REST client for the contacts endpoint.

pub mod api;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod dedup;
pub mod models;
pub mod store;
pub mod sync;
pub mod worker;

#[cfg(test)]
mod testing;

pub use api::{ApiClient, ApiError, ContactsApi};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use connectivity::{ConnectivityProbe, WatchConnectivity};
pub use dedup::{ContactRecorder, DedupGuard, RecordContactOptions, RecordOutcome};
pub use store::{LocalDatabase, Store, StoreError};
pub use sync::{DrainReport, SyncError, SyncManager};
pub use worker::{CacheController, FetchRequest, FetchResponse};
