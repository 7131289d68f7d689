//! The request-intercepting cache layer.
//!
//! Requests are routed by [`rules::RequestInterceptor`] to one of three
//! strategies (cache-first, network-first, stale-while-revalidate) backed by
//! versioned named caches in a [`CacheStorage`]. The controller also bridges
//! notification clicks and background-sync events to open pages.

pub mod cache;
pub mod clients;
pub mod controller;
pub mod fetcher;
pub mod http;
pub mod rules;

pub use cache::{CacheStorage, JsonCacheStorage, MemoryCacheStorage};
pub use clients::{
    ClientId, ClientInfo, ClientMessage, Clients, ClientsError, LocalClients, NotificationData,
    SYNC_CONTACTS_TAG,
};
pub use controller::{CacheController, InstallReport, Interception};
pub use fetcher::{Fetcher, ReqwestFetcher};
pub use http::{FetchError, FetchRequest, FetchResponse};
pub use rules::{CacheKind, RequestInterceptor, Route, Strategy};
