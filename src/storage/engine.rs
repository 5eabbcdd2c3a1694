use crate::core::{CounterKey, CounterRecord, Result};
use async_trait::async_trait;

/// Counter store trait - allows pluggable storage backends.
///
/// Every method is one atomic operation against a single collection; callers
/// never need a transaction around them. Implementations must enforce the
/// unique `(field, entityType)` index themselves, not trust the caller.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Create a counter collection. Fails with `CollectionExists` if present.
    async fn create_collection(&self, name: &str) -> Result<()>;

    /// Check if a collection exists
    async fn has_collection(&self, name: &str) -> Result<bool>;

    /// Insert a new record. Fails with `ConstraintViolation` on a duplicate key.
    async fn insert(&self, collection: &str, record: CounterRecord) -> Result<()>;

    /// Read a record without mutating it
    async fn find(&self, collection: &str, key: &CounterKey) -> Result<Option<CounterRecord>>;

    /// Add `by` to the count and return the post-increment value,
    /// or `None` if no record matches.
    async fn increment(&self, collection: &str, key: &CounterKey, by: i64) -> Result<Option<i64>>;

    /// Set the count to `value` only when the stored count is lower.
    /// Returns whether the record changed.
    async fn raise_to(&self, collection: &str, key: &CounterKey, value: i64) -> Result<bool>;

    /// Unconditionally overwrite the count, returning the new value,
    /// or `None` if no record matches.
    async fn set(&self, collection: &str, key: &CounterKey, value: i64) -> Result<Option<i64>>;

    /// All records of a collection, ordered by key
    async fn list(&self, collection: &str) -> Result<Vec<CounterRecord>>;
}
