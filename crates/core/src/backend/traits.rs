use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::{Query, Result};

/// Request/response interface of the relational backend.
///
/// Every write returns the authoritative row as stored, so callers can patch
/// local state without waiting for the matching change notification.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Runs a filtered, projected read.
    async fn select(&self, query: &Query) -> Result<Vec<Value>>;

    /// Counts the rows a query would return, ignoring projection and limit.
    async fn count(&self, query: &Query) -> Result<usize>;

    /// Inserts a row and returns it as stored.
    async fn insert(&self, table: &str, row: Value) -> Result<Value>;

    /// Merges `patch` into the row with `id` and returns the updated row.
    async fn update(&self, table: &str, id: Uuid, patch: Value) -> Result<Value>;

    /// Deletes the row with `id` and returns the removed row.
    async fn delete(&self, table: &str, id: Uuid) -> Result<Value>;
}
