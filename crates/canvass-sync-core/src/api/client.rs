//! API client for the CRM's REST endpoints.
//!
//! This module provides the `ApiClient` struct for making authenticated
//! requests to create, update and delete contacts and to list voters.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::{ApiError, ContactsApi};
use crate::models::{ContactPayload, RemoteContact, Voter};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests within one call.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client for the CRM.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    initial_backoff: Duration,
}

impl ApiClient {
    /// Create a new API client rooted at `base_url` (e.g. `https://crm.example.org/api`).
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let parsed = reqwest::Url::parse(base_url)
            .map_err(|e| ApiError::InvalidBaseUrl(format!("{}: {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::InvalidBaseUrl(base_url.to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
            initial_backoff: self.initial_backoff,
        }
    }

    #[cfg(test)]
    fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Join path segments onto the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<String, ApiError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ApiError::InvalidBaseUrl(format!("{}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidBaseUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url.into())
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(ref token) = self.token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::InvalidResponse("token is not a valid header value".to_string()))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Send a request, backing off and retrying while the server answers 429.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let mut request = self
                .client
                .request(method.clone(), url)
                .headers(self.auth_headers()?);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(url = url, retry = retries, backoff_ms = backoff.as_millis() as u64, "Rate limited, backing off");
                tokio::time::sleep(backoff).await;
                backoff *= 2; // Exponential backoff
                continue;
            }
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        let response = self.send(method, url, body).await?;
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON from {}: {}", url, e)))
    }
}

#[async_trait]
impl ContactsApi for ApiClient {
    async fn create_contact(&self, payload: &ContactPayload) -> Result<RemoteContact, ApiError> {
        let url = self.endpoint(&["contacts"])?;
        let created: RemoteContact = self.send_json(Method::POST, &url, Some(payload)).await?;
        debug!(id = %created.id, voter_id = %payload.voter_id, "Contact created");
        Ok(created)
    }

    async fn update_contact(
        &self,
        id: &str,
        payload: &ContactPayload,
    ) -> Result<RemoteContact, ApiError> {
        let url = self.endpoint(&["contacts", id])?;
        self.send_json(Method::PUT, &url, Some(payload)).await
    }

    async fn delete_contact(&self, id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["contacts", id])?;
        self.send::<()>(Method::DELETE, &url, None).await?;
        debug!(id, "Contact deleted");
        Ok(())
    }

    async fn list_voters(&self, campaign_id: &str) -> Result<Vec<Voter>, ApiError> {
        let url = self.endpoint(&["campaigns", campaign_id, "voters"])?;
        self.send_json::<Vec<Voter>, ()>(Method::GET, &url, None).await
    }
}
