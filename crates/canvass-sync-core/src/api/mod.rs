//! REST client for the CRM's contact and voter endpoints.
//!
//! `ContactsApi` is the seam the sync manager and recorder depend on;
//! `ApiClient` implements it over HTTP with bearer-token authentication.

pub mod client;
pub mod error;

use async_trait::async_trait;

pub use client::ApiClient;
pub use error::ApiError;

use crate::models::{ContactPayload, RemoteContact, Voter};

#[async_trait]
pub trait ContactsApi: Send + Sync {
    /// `POST /contacts`. Returns the canonical contact with its server id.
    async fn create_contact(&self, payload: &ContactPayload) -> Result<RemoteContact, ApiError>;

    /// `PUT /contacts/{id}`.
    async fn update_contact(
        &self,
        id: &str,
        payload: &ContactPayload,
    ) -> Result<RemoteContact, ApiError>;

    /// `DELETE /contacts/{id}`.
    async fn delete_contact(&self, id: &str) -> Result<(), ApiError>;

    /// `GET /campaigns/{id}/voters`.
    async fn list_voters(&self, campaign_id: &str) -> Result<Vec<Voter>, ApiError>;
}
