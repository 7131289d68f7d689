//! Online/offline state.
//!
//! The platform layer (network monitor, OS callbacks, or the CLI's one-shot
//! probe) feeds transitions into a [`WatchConnectivity`]; everything else
//! reads it through the [`ConnectivityProbe`] trait.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

/// Timeout for the one-shot reachability probe.
const PROBE_TIMEOUT_SECS: u64 = 5;

pub trait ConnectivityProbe: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receiver that observes every transition. The current value is
    /// marked as seen.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Settable connectivity state backed by a `watch` channel.
#[derive(Debug)]
pub struct WatchConnectivity {
    tx: watch::Sender<bool>,
}

impl WatchConnectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Record a transition. Setting the current value again is a no-op and
    /// wakes no subscriber.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
    }
}

impl Default for WatchConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityProbe for WatchConnectivity {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// One-shot reachability check: any HTTP response counts as online, a
/// transport failure or timeout as offline.
pub async fn probe_endpoint(client: &reqwest::Client, url: &str) -> bool {
    let result = client
        .head(url)
        .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
        .send()
        .await;
    match result {
        Ok(response) => {
            debug!(url, status = %response.status(), "Endpoint reachable");
            true
        }
        Err(e) => {
            debug!(url, error = %e, "Endpoint unreachable");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_transitions_only() {
        let connectivity = WatchConnectivity::new(false);
        let mut rx = connectivity.subscribe();

        connectivity.set_online(false);
        assert!(!rx.has_changed().unwrap());

        connectivity.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(connectivity.is_online());
    }

    #[tokio::test]
    async fn test_probe_endpoint() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::HEAD).path("/health");
                then.status(204);
            })
            .await;

        let client = reqwest::Client::new();
        assert!(probe_endpoint(&client, &server.url("/health")).await);
        assert!(!probe_endpoint(&client, "http://127.0.0.1:1/health").await);
    }
}
