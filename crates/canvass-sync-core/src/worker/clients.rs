//! Pages controlled by the cache controller, and the messages sent to them.
//!
//! The controller and the pages share no memory; everything crosses this
//! boundary as a [`ClientMessage`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Background-sync tag that asks pages to drain the contact outbox.
pub const SYNC_CONTACTS_TAG: &str = "sync-contacts";

pub type ClientId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    SyncPendingContacts,
}

/// Data attached to a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub url: String,
    pub focused: bool,
    pub controlled: bool,
}

#[derive(Error, Debug)]
pub enum ClientsError {
    #[error("No such client: {0}")]
    NotFound(ClientId),

    #[error("Client {0} is not listening")]
    Disconnected(ClientId),
}

#[async_trait]
pub trait Clients: Send + Sync {
    async fn match_all(&self) -> Vec<ClientInfo>;

    async fn focus(&self, id: ClientId) -> Result<(), ClientsError>;

    async fn open_window(&self, url: &str) -> Result<ClientId, ClientsError>;

    async fn post_message(&self, id: ClientId, message: ClientMessage) -> Result<(), ClientsError>;

    /// Take control of every open page without waiting for a reload.
    async fn claim(&self) -> Result<(), ClientsError>;
}

struct Page {
    url: String,
    focused: bool,
    controlled: bool,
    tx: Option<mpsc::UnboundedSender<ClientMessage>>,
}

#[derive(Default)]
struct Registry {
    next_id: ClientId,
    pages: BTreeMap<ClientId, Page>,
}

impl Registry {
    fn add(&mut self, url: &str, tx: Option<mpsc::UnboundedSender<ClientMessage>>) -> ClientId {
        self.next_id += 1;
        let id = self.next_id;
        self.pages.insert(
            id,
            Page {
                url: url.to_string(),
                focused: false,
                controlled: false,
                tx,
            },
        );
        id
    }

    fn focus(&mut self, id: ClientId) -> Result<(), ClientsError> {
        if !self.pages.contains_key(&id) {
            return Err(ClientsError::NotFound(id));
        }
        for (page_id, page) in self.pages.iter_mut() {
            page.focused = *page_id == id;
        }
        Ok(())
    }
}

/// In-process page registry.
///
/// Pages `connect` to receive messages; `open_window` registers a page
/// that has not started listening yet.
#[derive(Default)]
pub struct LocalClients {
    inner: Mutex<Registry>,
}

impl LocalClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, url: &str) -> (ClientId, mpsc::UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.lock().add(url, Some(tx));
        debug!(client = id, url, "Page connected");
        (id, rx)
    }

    pub fn disconnect(&self, id: ClientId) {
        self.inner.lock().pages.remove(&id);
    }
}

#[async_trait]
impl Clients for LocalClients {
    async fn match_all(&self) -> Vec<ClientInfo> {
        self.inner
            .lock()
            .pages
            .iter()
            .map(|(id, page)| ClientInfo {
                id: *id,
                url: page.url.clone(),
                focused: page.focused,
                controlled: page.controlled,
            })
            .collect()
    }

    async fn focus(&self, id: ClientId) -> Result<(), ClientsError> {
        self.inner.lock().focus(id)
    }

    async fn open_window(&self, url: &str) -> Result<ClientId, ClientsError> {
        let mut g = self.inner.lock();
        let id = g.add(url, None);
        g.focus(id)?;
        debug!(client = id, url, "Opened window");
        Ok(id)
    }

    async fn post_message(&self, id: ClientId, message: ClientMessage) -> Result<(), ClientsError> {
        let g = self.inner.lock();
        let page = g.pages.get(&id).ok_or(ClientsError::NotFound(id))?;
        let tx = page.tx.as_ref().ok_or(ClientsError::Disconnected(id))?;
        tx.send(message).map_err(|_| ClientsError::Disconnected(id))
    }

    async fn claim(&self) -> Result<(), ClientsError> {
        for page in self.inner.lock().pages.values_mut() {
            page.controlled = true;
        }
        Ok(())
    }
}
