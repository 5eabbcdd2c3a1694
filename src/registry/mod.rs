//! Counter registry: the counter collection and its atomic operations.

use crate::connection::RegistryConfig;
use crate::core::{CounterError, CounterKey, CounterRecord, Result};
use crate::document::{EntitySchema, FieldDef, FieldKind};
use crate::sequence::{SequenceBinding, SequenceOptions};
use crate::storage::CounterStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Handle to the counter collection of one store connection.
///
/// Cheap to clone; clones share the store and the initialized flag. Every
/// binding keeps a clone, so the registry is passed explicitly instead of
/// living in process-wide state.
#[derive(Clone)]
pub struct CounterRegistry {
    store: Arc<dyn CounterStore>,
    config: Arc<RegistryConfig>,
    initialized: Arc<AtomicBool>,
}

impl CounterRegistry {
    /// Wrap a store connection. Call [`initialize`](Self::initialize) before
    /// registering bindings.
    pub fn new(store: Arc<dyn CounterStore>, config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config: Arc::new(config),
            initialized: Arc::new(AtomicBool::new(false)),
        })
    }

    /// `new` followed by `initialize`
    pub async fn open(store: Arc<dyn CounterStore>, config: RegistryConfig) -> Result<Self> {
        let registry = Self::new(store, config)?;
        registry.initialize().await?;
        Ok(registry)
    }

    /// Create the counter collection, or adopt it if another process
    /// already did.
    pub async fn initialize(&self) -> Result<()> {
        let collection = &self.config.collection;
        match self.store.create_collection(collection).await {
            Ok(()) => info!(collection = %collection, "created counter collection"),
            Err(CounterError::CollectionExists(_)) => {
                debug!(collection = %collection, "using existing counter collection")
            }
            Err(err) => return Err(err),
        }
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn collection(&self) -> &str {
        &self.config.collection
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Create the counter at `initial_count` unless it exists.
    ///
    /// Losing a creation race to another writer is success: the unique index
    /// guarantees exactly one record survives.
    pub async fn ensure_counter(&self, key: &CounterKey, initial_count: i64) -> Result<()> {
        if self.store.find(self.collection(), key).await?.is_some() {
            debug!(entity_type = %key.entity_type, field = %key.field, "counter exists");
            return Ok(());
        }

        match self
            .store
            .insert(self.collection(), CounterRecord::new(key, initial_count))
            .await
        {
            Ok(()) => {
                info!(
                    entity_type = %key.entity_type,
                    field = %key.field,
                    count = initial_count,
                    "created counter"
                );
                Ok(())
            }
            Err(CounterError::ConstraintViolation(_)) => {
                debug!(
                    entity_type = %key.entity_type,
                    field = %key.field,
                    "counter created concurrently"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Current count, without mutating it
    pub async fn peek(&self, key: &CounterKey) -> Result<Option<i64>> {
        Ok(self
            .store
            .find(self.collection(), key)
            .await?
            .map(|record| record.count))
    }

    /// Value the next creation under `options` would receive. Reserves nothing.
    pub async fn preview_next(&self, options: &SequenceOptions) -> Result<i64> {
        let current = self.peek(&options.key()).await?;
        options.next_after(current)
    }

    /// Atomically add `by` and return the new count.
    pub async fn increment_and_get(&self, key: &CounterKey, by: i64) -> Result<i64> {
        self.store
            .increment(self.collection(), key, by)
            .await?
            .ok_or_else(|| not_found(key))
    }

    /// Move the watermark up to `value` if the stored count is lower.
    /// Returns whether it moved.
    pub async fn raise_to(&self, key: &CounterKey, value: i64) -> Result<bool> {
        let raised = self.store.raise_to(self.collection(), key, value).await?;
        if raised {
            debug!(entity_type = %key.entity_type, field = %key.field, count = value, "raised counter");
        }
        Ok(raised)
    }

    /// Unconditionally overwrite the count.
    pub async fn reset_to(&self, key: &CounterKey, value: i64) -> Result<i64> {
        let count = self
            .store
            .set(self.collection(), key, value)
            .await?
            .ok_or_else(|| not_found(key))?;
        info!(entity_type = %key.entity_type, field = %key.field, count, "reset counter");
        Ok(count)
    }

    pub async fn counters(&self) -> Result<Vec<CounterRecord>> {
        self.store.list(self.collection()).await
    }

    /// Register a sequence on `schema`.
    ///
    /// Declares the field on the schema (unique unless it is the primary key
    /// or `unique` is off), attaches the creation hook and starts creating
    /// the counter record in the background. Must run inside a tokio
    /// runtime.
    pub fn plugin(
        &self,
        schema: &mut EntitySchema,
        options: impl Into<SequenceOptions>,
    ) -> Result<Arc<SequenceBinding>> {
        if !self.is_initialized() {
            return Err(CounterError::NotInitialized);
        }
        let options = options.into();
        if schema.sequence(&options.field).is_some() {
            return Err(CounterError::Configuration(format!(
                "field '{}' of '{}' already has a sequence",
                options.field,
                schema.name()
            )));
        }
        let binding = Arc::new(SequenceBinding::new(self.clone(), options.clone())?);
        binding.start()?;

        let is_primary = options.field == schema.primary_key();
        schema.add_field(
            FieldDef::new(options.field.clone(), FieldKind::Integer)
                .required()
                .unique(is_primary || options.unique),
        );
        schema.attach_sequence(Arc::clone(&binding))?;
        Ok(binding)
    }
}

fn not_found(key: &CounterKey) -> CounterError {
    CounterError::CounterNotFound {
        entity_type: key.entity_type.clone(),
        field: key.field.clone(),
    }
}

impl std::fmt::Debug for CounterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterRegistry")
            .field("collection", &self.config.collection)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryCounterStore;

    async fn registry() -> CounterRegistry {
        CounterRegistry::open(Arc::new(MemoryCounterStore::new()), RegistryConfig::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_initialize_is_repeatable() {
        let registry = registry().await;
        registry.initialize().await.unwrap();
        assert!(registry.is_initialized());
    }

    #[tokio::test]
    async fn test_plugin_before_initialize() {
        let registry =
            CounterRegistry::new(Arc::new(MemoryCounterStore::new()), RegistryConfig::new()).unwrap();
        let mut schema = EntitySchema::new("Book");
        let err = registry.plugin(&mut schema, "Book").unwrap_err();
        assert!(matches!(err, CounterError::NotInitialized));
        assert!(schema.fields().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_counter_keeps_existing() {
        let registry = registry().await;
        let key = CounterKey::new("Book", "_id");

        registry.ensure_counter(&key, -1).await.unwrap();
        registry.increment_and_get(&key, 1).await.unwrap();
        registry.ensure_counter(&key, -1).await.unwrap();

        assert_eq!(registry.peek(&key).await.unwrap(), Some(0));
        assert_eq!(registry.counters().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_preview_next_follows_counter() {
        let registry = registry().await;
        let options = SequenceOptions::new("Book").start_at(10).increment_by(5);

        assert_eq!(registry.preview_next(&options).await.unwrap(), 10);
        registry.ensure_counter(&options.key(), options.initial_count().unwrap()).await.unwrap();
        assert_eq!(registry.preview_next(&options).await.unwrap(), 10);

        registry.increment_and_get(&options.key(), 5).await.unwrap();
        assert_eq!(registry.preview_next(&options).await.unwrap(), 15);
        assert_eq!(registry.peek(&options.key()).await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_mutations_on_missing_counter() {
        let registry = registry().await;
        let key = CounterKey::new("Ghost", "_id");

        assert_eq!(registry.peek(&key).await.unwrap(), None);
        assert!(matches!(
            registry.increment_and_get(&key, 1).await,
            Err(CounterError::CounterNotFound { .. })
        ));
        assert!(matches!(
            registry.reset_to(&key, 0).await,
            Err(CounterError::CounterNotFound { .. })
        ));
        assert!(!registry.raise_to(&key, 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_plugin_declares_field() {
        let registry = registry().await;

        let mut books = EntitySchema::new("Book");
        registry
            .plugin(&mut books, SequenceOptions::new("Book").field("seq").unique(false))
            .unwrap();
        let field = books.field("seq").unwrap();
        assert!(field.required);
        assert!(!field.unique);

        let mut authors = EntitySchema::new("Author");
        registry.plugin(&mut authors, "Author").unwrap();
        assert!(authors.field("_id").unwrap().unique);
        assert!(authors.sequence("_id").is_some());

        let err = registry.plugin(&mut authors, "Author").unwrap_err();
        assert!(matches!(err, CounterError::Configuration(_)));
    }

    #[test]
    fn test_plugin_outside_runtime() {
        let registry =
            CounterRegistry::new(Arc::new(MemoryCounterStore::new()), RegistryConfig::new()).unwrap();
        registry.initialized.store(true, Ordering::Release);

        let mut schema = EntitySchema::new("Book");
        let err = registry.plugin(&mut schema, "Book").unwrap_err();
        assert!(matches!(err, CounterError::Configuration(_)));
        assert!(schema.sequence("_id").is_none());
    }
}
