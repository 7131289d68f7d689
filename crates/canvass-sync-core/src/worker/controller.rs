//! The request-intercepting cache controller.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::cache::CacheStorage;
use super::clients::{ClientMessage, Clients, ClientsError, NotificationData, SYNC_CONTACTS_TAG};
use super::fetcher::Fetcher;
use super::http::{FetchError, FetchRequest, FetchResponse};
use super::rules::{CacheKind, RequestInterceptor, Route, Strategy};
use crate::config::CacheSettings;

/// Result of offering a request to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    /// Not handled; the caller sends the request to the network itself.
    PassThrough,
    /// Handled; this is the response. Never a network error.
    Respond(FetchResponse),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: Vec<String>,
    pub failed: Vec<String>,
}

/// Serves requests by route-specific caching strategy.
///
/// Cache names, version token and route patterns come from
/// [`CacheSettings`]; the network, the cache store and the set of open
/// pages are injected.
pub struct CacheController {
    settings: CacheSettings,
    interceptor: RequestInterceptor,
    fetcher: Arc<dyn Fetcher>,
    storage: Arc<dyn CacheStorage>,
    clients: Arc<dyn Clients>,
}

impl CacheController {
    pub fn new(
        settings: CacheSettings,
        fetcher: Arc<dyn Fetcher>,
        storage: Arc<dyn CacheStorage>,
        clients: Arc<dyn Clients>,
    ) -> Result<Self, regex::Error> {
        let interceptor = RequestInterceptor::from_settings(&settings)?;
        Ok(Self {
            settings,
            interceptor,
            fetcher,
            storage,
            clients,
        })
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn interceptor(&self) -> &RequestInterceptor {
        &self.interceptor
    }

    pub fn cache_name(&self, kind: CacheKind) -> String {
        match kind {
            CacheKind::Static => self.settings.static_cache_name(),
            CacheKind::Dynamic => self.settings.dynamic_cache_name(),
            CacheKind::Api => self.settings.api_cache_name(),
        }
    }

    // ===== Lifecycle =====

    /// Pre-populate the static cache with the app shell. Assets are fetched
    /// concurrently; individual failures are recorded and skipped.
    pub async fn install(&self) -> InstallReport {
        let cache = self.cache_name(CacheKind::Static);
        let origin = self.settings.origin.trim_end_matches('/');

        let fetches: Vec<_> = self
            .settings
            .shell_assets
            .iter()
            .map(|asset| {
                let url = format!("{}{}", origin, asset);
                let cache = cache.as_str();
                async move { (asset, self.precache(cache, &url).await) }
            })
            .collect();
        let results = futures::future::join_all(fetches).await;

        let mut report = InstallReport::default();
        for (asset, outcome) in results {
            match outcome {
                Ok(()) => report.cached.push(asset.clone()),
                Err(reason) => {
                    warn!(asset = %asset, reason = %reason, "Failed to pre-cache shell asset");
                    report.failed.push(asset.clone());
                }
            }
        }

        info!(cached = report.cached.len(), failed = report.failed.len(), "Installed");
        report
    }

    async fn precache(&self, cache: &str, url: &str) -> Result<(), String> {
        let req = FetchRequest::get(url).map_err(|e| e.to_string())?;
        let resp = self.fetcher.fetch(&req).await.map_err(|e| e.to_string())?;
        if !resp.is_success() {
            return Err(format!("status {}", resp.status));
        }
        self.store(cache, &req.cache_key(), resp).await;
        Ok(())
    }

    /// Delete every cache not tagged with the current version, then take
    /// control of all open pages. Returns the deleted cache names.
    pub async fn activate(&self) -> Vec<String> {
        let mut deleted = Vec::new();
        match self.storage.keys().await {
            Ok(names) => {
                for name in names {
                    if self.is_current(&name) {
                        continue;
                    }
                    match self.storage.delete(&name).await {
                        Ok(_) => deleted.push(name),
                        Err(e) => warn!(cache = %name, error = %e, "Failed to delete old cache"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to list caches"),
        }

        if let Err(e) = self.clients.claim().await {
            warn!(error = %e, "Failed to claim clients");
        }
        info!(version = %self.settings.version, deleted = deleted.len(), "Activated");
        deleted
    }

    /// Whether a cache name carries the current version token as one of its
    /// `-`-separated segments.
    fn is_current(&self, name: &str) -> bool {
        [CacheKind::Static, CacheKind::Dynamic, CacheKind::Api]
            .into_iter()
            .any(|kind| self.cache_name(kind) == name)
    }

    // ===== Fetch interception =====

    pub async fn handle_fetch(&self, req: &FetchRequest) -> Interception {
        match self.interceptor.classify(req) {
            Route::PassThrough => Interception::PassThrough,
            Route::Handle { strategy, cache } => {
                let cache = self.cache_name(cache);
                let resp = match strategy {
                    Strategy::CacheFirst => self.cache_first(req, &cache).await,
                    Strategy::NetworkFirst => self.network_first(req, &cache).await,
                    Strategy::StaleWhileRevalidate => self.stale_while_revalidate(req, &cache).await,
                };
                Interception::Respond(resp)
            }
        }
    }

    /// Like `handle_fetch`, but also performs pass-through requests. Only
    /// pass-through requests can fail.
    pub async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse, FetchError> {
        match self.handle_fetch(req).await {
            Interception::Respond(resp) => Ok(resp),
            Interception::PassThrough => self.fetcher.fetch(req).await,
        }
    }

    pub async fn cache_first(&self, req: &FetchRequest, cache: &str) -> FetchResponse {
        let key = req.cache_key();
        if let Some(cached) = self.cached(cache, &key).await {
            debug!(url = %req.url, cache, "Cache hit");
            return cached;
        }
        match self.fetcher.fetch(req).await {
            Ok(resp) => {
                if resp.is_success() {
                    self.store(cache, &key, resp.clone()).await;
                }
                resp
            }
            Err(e) => {
                debug!(url = %req.url, error = %e, "Network failed with no cached copy");
                FetchResponse::offline()
            }
        }
    }

    pub async fn network_first(&self, req: &FetchRequest, cache: &str) -> FetchResponse {
        let key = req.cache_key();
        match self.fetcher.fetch(req).await {
            Ok(resp) => {
                if resp.is_success() {
                    self.store(cache, &key, resp.clone()).await;
                }
                resp
            }
            Err(e) => {
                debug!(url = %req.url, error = %e, "Network failed, trying cache");
                match self.cached(cache, &key).await {
                    Some(cached) => cached,
                    None => FetchResponse::offline_envelope(&self.settings.offline_message),
                }
            }
        }
    }

    pub async fn stale_while_revalidate(&self, req: &FetchRequest, cache: &str) -> FetchResponse {
        let key = req.cache_key();
        if let Some(cached) = self.cached(cache, &key).await {
            let fetcher = Arc::clone(&self.fetcher);
            let storage = Arc::clone(&self.storage);
            let req = req.clone();
            let cache = cache.to_string();
            tokio::spawn(async move {
                match fetcher.fetch(&req).await {
                    Ok(resp) if resp.is_success() => {
                        if let Err(e) = storage.put(&cache, &key, resp).await {
                            debug!(url = %req.url, error = %e, "Background revalidation not stored");
                        }
                    }
                    Ok(resp) => debug!(url = %req.url, status = resp.status, "Background revalidation skipped"),
                    Err(e) => debug!(url = %req.url, error = %e, "Background revalidation failed"),
                }
            });
            return cached;
        }

        match self.fetcher.fetch(req).await {
            Ok(resp) => {
                if resp.is_success() {
                    self.store(cache, &key, resp.clone()).await;
                }
                resp
            }
            Err(e) => {
                debug!(url = %req.url, error = %e, "Network failed with no cached copy");
                FetchResponse::offline()
            }
        }
    }

    async fn cached(&self, cache: &str, key: &str) -> Option<FetchResponse> {
        match self.storage.match_request(cache, key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(cache, key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn store(&self, cache: &str, key: &str, resp: FetchResponse) {
        if let Err(e) = self.storage.put(cache, key, resp).await {
            warn!(cache, key, error = %e, "Cache write failed");
        }
    }

    // ===== Page bridges =====

    /// Focus an open page showing the notification's target, or open one.
    pub async fn on_notification_click(&self, data: &NotificationData) -> Result<(), ClientsError> {
        let target = data
            .url
            .clone()
            .unwrap_or_else(|| self.settings.dashboard_path.clone());

        let pages = self.clients.match_all().await;
        if let Some(page) = pages.iter().find(|page| page.url.contains(&target)) {
            debug!(client = page.id, url = %target, "Focusing existing page");
            return self.clients.focus(page.id).await;
        }
        self.clients.open_window(&target).await.map(|_| ())
    }

    /// Handle a background-sync event. For the contact tag, every open page
    /// is told to drain its outbox. Returns the number of pages notified.
    pub async fn on_sync(&self, tag: &str) -> usize {
        if tag != SYNC_CONTACTS_TAG {
            debug!(tag, "Ignoring unknown sync tag");
            return 0;
        }
        let mut notified = 0;
        for page in self.clients.match_all().await {
            match self
                .clients
                .post_message(page.id, ClientMessage::SyncPendingContacts)
                .await
            {
                Ok(()) => notified += 1,
                Err(e) => debug!(client = page.id, error = %e, "Could not notify page"),
            }
        }
        info!(notified, "Broadcast outbox sync request");
        notified
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use reqwest::header::ACCEPT;
    use reqwest::StatusCode;

    use super::*;
    use crate::worker::cache::MemoryCacheStorage;
    use crate::testing::eventually;
    use crate::worker::clients::LocalClients;

    /// Serves canned bodies per URL; fails every request while offline.
    #[derive(Default)]
    struct FakeNetwork {
        offline: AtomicBool,
        calls: AtomicUsize,
        bodies: Mutex<HashMap<String, (u16, String)>>,
    }

    impl FakeNetwork {
        fn serve(&self, url: &str, status: u16, body: &str) {
            self.bodies.lock().insert(url.to_string(), (status, body.to_string()));
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for FakeNetwork {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(FetchError::Network("offline".to_string()));
            }
            let found = self.bodies.lock().get(request.url.as_str()).cloned();
            let (status, body) = found.unwrap_or((404, "not found".to_string()));
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            Ok(FetchResponse::new(status, body))
        }
    }

    struct Harness {
        net: Arc<FakeNetwork>,
        storage: Arc<MemoryCacheStorage>,
        clients: Arc<LocalClients>,
        controller: CacheController,
    }

    fn harness_with(settings: CacheSettings) -> Harness {
        let net = Arc::new(FakeNetwork::default());
        let storage = Arc::new(MemoryCacheStorage::new());
        let clients = Arc::new(LocalClients::new());
        let controller = CacheController::new(
            settings,
            net.clone(),
            storage.clone(),
            clients.clone(),
        )
        .unwrap();
        Harness {
            net,
            storage,
            clients,
            controller,
        }
    }

    fn harness() -> Harness {
        harness_with(CacheSettings {
            origin: "https://app.example.org".to_string(),
            ..CacheSettings::default()
        })
    }

    fn get(path: &str) -> FetchRequest {
        FetchRequest::get(&format!("https://app.example.org{}", path)).unwrap()
    }

    fn respond(interception: Interception) -> FetchResponse {
        match interception {
            Interception::Respond(resp) => resp,
            Interception::PassThrough => panic!("expected the request to be handled"),
        }
    }

    #[tokio::test]
    async fn test_cache_first_is_idempotent_and_skips_network_on_hit() {
        let h = harness();
        let url = "https://app.example.org/_next/static/app.js";
        h.net.serve(url, 200, "console.log(1)");

        let first = respond(h.controller.handle_fetch(&get("/_next/static/app.js")).await);
        let second = respond(h.controller.handle_fetch(&get("/_next/static/app.js")).await);

        assert_eq!(h.net.calls(), 1);
        assert_eq!(first, second);
        let stored = h.storage.match_request("canvass-static-v1", url).await.unwrap().unwrap();
        assert_eq!(stored.body, b"console.log(1)".to_vec());
    }

    #[tokio::test]
    async fn test_cache_first_does_not_store_errors() {
        let h = harness();
        let resp = respond(h.controller.handle_fetch(&get("/images/missing.png")).await);
        assert_eq!(resp.status, 404);
        assert!(h.storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_first_offline_without_cache_is_503() {
        let h = harness();
        h.net.offline.store(true, Ordering::SeqCst);
        let resp = respond(h.controller.handle_fetch(&get("/images/logo.png")).await);
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cache() {
        let h = harness();
        h.net.serve("https://app.example.org/api/voters", 200, r#"[{"id":"v-1"}]"#);
        let online = respond(h.controller.handle_fetch(&get("/api/voters")).await);

        h.net.offline.store(true, Ordering::SeqCst);
        let offline = respond(h.controller.handle_fetch(&get("/api/voters")).await);

        assert_eq!(online, offline);
        assert_eq!(h.net.calls(), 2);
    }

    #[tokio::test]
    async fn test_network_first_offline_envelope() {
        let h = harness();
        h.net.offline.store(true, Ordering::SeqCst);
        let resp = respond(h.controller.handle_fetch(&get("/api/contacts?voterId=v-9")).await);

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["error"], CacheSettings::default().offline_message);
    }

    #[tokio::test]
    async fn test_html_navigation_uses_dynamic_cache() {
        let h = harness();
        h.net.serve("https://app.example.org/dashboard", 200, "<html>dash</html>");
        let req = get("/dashboard").with_header(ACCEPT, "text/html").unwrap();
        respond(h.controller.handle_fetch(&req).await);
        assert!(h
            .storage
            .match_request("canvass-dynamic-v1", "https://app.example.org/dashboard")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_serves_stale_then_refreshes() {
        let h = harness();
        let url = "https://app.example.org/manifest.json";
        h.net.serve(url, 200, "v1");
        let first = respond(h.controller.handle_fetch(&get("/manifest.json")).await);
        assert_eq!(first.text(), "v1");

        h.net.serve(url, 200, "v2");
        let second = respond(h.controller.handle_fetch(&get("/manifest.json")).await);
        assert_eq!(second.text(), "v1");

        let net = h.net.clone();
        eventually(|| net.calls() == 2).await;
        let mut refreshed = false;
        for _ in 0..200 {
            let current = h.storage.match_request("canvass-dynamic-v1", url).await.unwrap();
            if current.map(|r| r.text() == "v2").unwrap_or(false) {
                refreshed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(refreshed);
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_ignores_background_failure() {
        let h = harness();
        let url = "https://app.example.org/manifest.json";
        h.net.serve(url, 200, "v1");
        respond(h.controller.handle_fetch(&get("/manifest.json")).await);

        h.net.offline.store(true, Ordering::SeqCst);
        let stale = respond(h.controller.handle_fetch(&get("/manifest.json")).await);
        assert_eq!(stale.text(), "v1");
        let net = h.net.clone();
        eventually(|| net.calls() == 2).await;
        let kept = h.storage.match_request("canvass-dynamic-v1", url).await.unwrap().unwrap();
        assert_eq!(kept.text(), "v1");
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_offline_without_cache_is_503() {
        let h = harness();
        h.net.offline.store(true, Ordering::SeqCst);
        let resp = respond(h.controller.handle_fetch(&get("/robots.txt")).await);
        assert_eq!(resp.status, 503);
    }

    #[tokio::test]
    async fn test_pass_through_is_not_cached() {
        let h = harness();
        h.net.serve("https://app.example.org/api/auth/session", 200, "{}");
        let req = get("/api/auth/session");
        assert_eq!(h.controller.handle_fetch(&req).await, Interception::PassThrough);
        assert_eq!(h.net.calls(), 0);

        let resp = h.controller.fetch(&req).await.unwrap();
        assert_eq!(resp.status, 200);
        assert!(h.storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_tolerates_failures() {
        let h = harness();
        h.net.serve("https://app.example.org/", 200, "<html>shell</html>");
        h.net.serve("https://app.example.org/manifest.json", 200, "{}");

        let report = h.controller.install().await;

        assert_eq!(report.cached, vec!["/".to_string(), "/manifest.json".to_string()]);
        assert_eq!(report.failed.len(), CacheSettings::default().shell_assets.len() - 2);
        assert!(h
            .storage
            .match_request("canvass-static-v1", "https://app.example.org/")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_activate_rolls_over_version() {
        let h = harness_with(CacheSettings {
            version: "v2".to_string(),
            ..CacheSettings::default()
        });
        let resp = FetchResponse::new(StatusCode::OK, "x");
        for name in ["canvass-static-v1", "canvass-api-v1", "canvass-dynamic-v10", "canvass-api-v2"] {
            h.storage.put(name, "https://a/", resp.clone()).await.unwrap();
        }
        let (_, _rx) = h.clients.connect("https://app.example.org/dashboard");

        let mut deleted = h.controller.activate().await;
        deleted.sort();

        assert_eq!(deleted, vec!["canvass-api-v1", "canvass-dynamic-v10", "canvass-static-v1"]);
        assert_eq!(h.storage.keys().await.unwrap(), vec!["canvass-api-v2"]);
        assert!(h.clients.match_all().await.iter().all(|c| c.controlled));
    }

    #[tokio::test]
    async fn test_activate_keeps_caches_of_dashed_version() {
        let h = harness_with(CacheSettings {
            version: "2024-06".to_string(),
            ..CacheSettings::default()
        });
        let resp = FetchResponse::new(StatusCode::OK, "x");
        for name in [
            "canvass-static-2024-06",
            "canvass-api-2024-06",
            "canvass-static-2024-05",
            "canvass-api-2023-06",
        ] {
            h.storage.put(name, "https://a/", resp.clone()).await.unwrap();
        }

        let mut deleted = h.controller.activate().await;
        deleted.sort();

        assert_eq!(deleted, vec!["canvass-api-2023-06", "canvass-static-2024-05"]);
        assert_eq!(
            h.storage.keys().await.unwrap(),
            vec!["canvass-api-2024-06", "canvass-static-2024-06"]
        );
    }

    #[tokio::test]
    async fn test_notification_click_focuses_or_opens() {
        let h = harness();
        let (existing, _rx) = h.clients.connect("https://app.example.org/voters/v-42");

        h.controller
            .on_notification_click(&NotificationData {
                url: Some("/voters/v-42".to_string()),
            })
            .await
            .unwrap();
        let pages = h.clients.match_all().await;
        assert_eq!(pages.len(), 1);
        assert!(pages.iter().any(|p| p.id == existing && p.focused));

        h.controller
            .on_notification_click(&NotificationData::default())
            .await
            .unwrap();
        let pages = h.clients.match_all().await;
        assert_eq!(pages.len(), 2);
        let opened = pages.iter().find(|p| p.id != existing).unwrap();
        assert_eq!(opened.url, "/dashboard");
        assert!(opened.focused);
    }

    #[tokio::test]
    async fn test_sync_tag_broadcasts_to_every_page() {
        let h = harness();
        let (_, mut rx1) = h.clients.connect("https://app.example.org/a");
        let (_, mut rx2) = h.clients.connect("https://app.example.org/b");

        assert_eq!(h.controller.on_sync("something-else").await, 0);
        assert_eq!(h.controller.on_sync(SYNC_CONTACTS_TAG).await, 2);
        assert_eq!(rx1.recv().await, Some(ClientMessage::SyncPendingContacts));
        assert_eq!(rx2.recv().await, Some(ClientMessage::SyncPendingContacts));
    }
}
