use crate::error::Result;
use async_trait::async_trait;
use burrow_core::{Stats, UserId, UserUrl};
use burrow_identity::Identity;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Result of shortening a single URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShortenOutcome {
    /// A new record was created.
    Created(String),
    /// The URL was already shortened; carries the existing short URL.
    Existing(String),
}

impl ShortenOutcome {
    pub fn short_url(&self) -> &str {
        match self {
            ShortenOutcome::Created(url) | ShortenOutcome::Existing(url) => url,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, ShortenOutcome::Created(_))
    }
}

/// One entry of a batch shorten request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Opaque client token echoed back in the response.
    pub correlation_id: String,
    pub original_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchShortened {
    pub correlation_id: String,
    pub short_url: String,
}

/// Operations offered to the request-handling layer.
#[async_trait]
pub trait Shortener: Send + Sync + 'static {
    /// Resolves the caller's identity from the cookie value they sent, if any.
    fn authenticate(&self, cookie: Option<&str>) -> Identity;

    /// Shortens `original_url` on behalf of `user`.
    ///
    /// Shortening a URL that already has a live record is not an error.
    async fn shorten(&self, original_url: &str, user: UserId) -> Result<ShortenOutcome>;

    /// Shortens every item as one all-or-nothing batch.
    async fn shorten_batch(
        &self,
        items: Vec<BatchItem>,
        user: UserId,
    ) -> Result<Vec<BatchShortened>>;

    /// Retrieves the original URL behind a short code.
    async fn resolve(&self, short_code: &str, user: UserId) -> Result<String>;

    /// Lists the live URLs shortened by `user`.
    async fn user_urls(&self, user: UserId) -> Result<Vec<UserUrl>>;

    /// Schedules the deletion of `short_codes` owned by `user`.
    ///
    /// Returns once the request is queued; deletion happens asynchronously.
    async fn delete_urls(&self, short_codes: Vec<String>, user: UserId) -> Result<()>;

    async fn ping(&self) -> Result<()>;

    /// Returns aggregate counters to callers inside the trusted subnet.
    async fn stats(&self, client_ip: Option<IpAddr>) -> Result<Stats>;
}
