use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;

/// An anonymous user, identified only by the number carried in their identity cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for UserId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored URL record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    /// Allocated by the backend, never reused.
    pub id: u64,
    /// The original URL. Immutable once stored.
    pub value: String,
    /// Soft-delete flag. Once set it is never cleared.
    pub deleted: bool,
}

/// One entry of a user's listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUrl {
    pub short_url: String,
    pub original_url: String,
}

/// Aggregate counters over a repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Records that are not soft-deleted.
    pub urls: u64,
    /// Distinct users owning at least one record.
    pub users: u64,
}

/// The storage contract used by the shortener.
///
/// Implementations must keep identifier allocation strictly increasing and
/// must never create an ownership edge to a record that does not exist.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    /// Returns the identifier the next insert will most likely receive.
    ///
    /// Advisory only: nothing is reserved between this call and an insert.
    async fn get_next_index(&self) -> Result<u64>;

    /// Stores `value` for `user` and returns the allocated identifier.
    ///
    /// Returns `Err(Conflict { id })` with the existing identifier if the value
    /// already has a live record.
    async fn insert_value(&self, value: &str, user: UserId) -> Result<u64>;

    /// Stores `values` under the contiguous identifiers starting at `start_index`.
    ///
    /// Either every value is stored or none is (`Err(Batch)`).
    async fn insert_batch_values(
        &self,
        values: &[String],
        start_index: u64,
        user: UserId,
    ) -> Result<()>;

    /// Returns the original URL stored under `id`.
    ///
    /// `Err(NotFound)` if absent, `Err(Gone)` if soft-deleted. Any user may read
    /// any record.
    async fn get_value(&self, id: u64, user: UserId) -> Result<String>;

    /// Lists the live records owned by `user`, oldest first.
    ///
    /// `Err(NoContent)` when the user has nothing to list.
    async fn get_user_urls(&self, user: UserId, base_url: &str) -> Result<Vec<UserUrl>>;

    /// Soft-deletes the records in `ids` that `user` owns.
    ///
    /// Identifiers owned by someone else, or unknown, are skipped silently.
    async fn mark_batch_as_deleted(&self, ids: &[u64], user: UserId) -> Result<()>;

    async fn get_stats(&self) -> Result<Stats>;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> Result<()>;

    /// Releases backend resources. No repository call may be in flight.
    async fn shutdown(&self) -> Result<()>;
}

#[async_trait]
impl<R: Repository> Repository for Arc<R> {
    async fn get_next_index(&self) -> Result<u64> {
        (**self).get_next_index().await
    }

    async fn insert_value(&self, value: &str, user: UserId) -> Result<u64> {
        (**self).insert_value(value, user).await
    }

    async fn insert_batch_values(
        &self,
        values: &[String],
        start_index: u64,
        user: UserId,
    ) -> Result<()> {
        (**self).insert_batch_values(values, start_index, user).await
    }

    async fn get_value(&self, id: u64, user: UserId) -> Result<String> {
        (**self).get_value(id, user).await
    }

    async fn get_user_urls(&self, user: UserId, base_url: &str) -> Result<Vec<UserUrl>> {
        (**self).get_user_urls(user, base_url).await
    }

    async fn mark_batch_as_deleted(&self, ids: &[u64], user: UserId) -> Result<()> {
        (**self).mark_batch_as_deleted(ids, user).await
    }

    async fn get_stats(&self) -> Result<Stats> {
        (**self).get_stats().await
    }

    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }

    async fn shutdown(&self) -> Result<()> {
        (**self).shutdown().await
    }
}
