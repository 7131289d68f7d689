//! Request and response values passed through the cache controller.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Network(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(url: &str) -> Result<Self, FetchError> {
        let url = Url::parse(url).map_err(|e| FetchError::InvalidRequest(format!("{}: {}", url, e)))?;
        Ok(Self::new(Method::GET, url))
    }

    pub fn with_header(mut self, name: HeaderName, value: &str) -> Result<Self, FetchError> {
        let value = HeaderValue::from_str(value)
            .map_err(|_| FetchError::InvalidRequest(format!("bad value for header {}", name)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Whether the `Accept` header asks for an HTML document.
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get_all(ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains("text/html"))
    }

    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }

    /// Key used to store this request's response. Fragments never reach
    /// the network, so they are not part of the key.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.to_string()
    }
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: status.as_u16(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        let mut response = Self::new(status, value.to_string());
        response
            .headers
            .push((CONTENT_TYPE.as_str().to_string(), "application/json".to_string()));
        response
    }

    /// Synthetic 503 with a JSON `{"error": ...}` body for network-first routes.
    pub fn offline_envelope(message: &str) -> Self {
        Self::json(
            StatusCode::SERVICE_UNAVAILABLE,
            &serde_json::json!({ "error": message }),
        )
    }

    /// Synthetic plain-text 503.
    pub fn offline() -> Self {
        let mut response = Self::new(StatusCode::SERVICE_UNAVAILABLE, "Offline");
        response
            .headers
            .push((CONTENT_TYPE.as_str().to_string(), "text/plain".to_string()));
        response
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn is_success(&self) -> bool {
        self.status().is_success()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
