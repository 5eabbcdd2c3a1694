// ============================================================================
// Identity Counter Library
// ============================================================================

pub mod core;
pub mod storage;
pub mod connection;
pub mod registry;
pub mod sequence;
pub mod document;

// Re-export main types for convenience
pub use crate::core::{CounterError, CounterKey, CounterRecord, Result};
pub use connection::RegistryConfig;
pub use registry::CounterRegistry;
pub use sequence::{Assignment, ReadyState, SequenceBinding, SequenceOptions};
pub use document::{Document, DocumentCollection, EntitySchema, FieldDef, FieldKind, SaveHook, SaveKind};
pub use storage::{CounterStore, DurabilityMode, MemoryCounterStore};

use std::sync::Arc;

/// Open a [`MemoryCounterStore`] as described by `config` and return an
/// initialized registry over it.
///
/// # Examples
///
/// ```
/// use identity_counter::{DocumentCollection, EntitySchema, RegistryConfig, SequenceOptions};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = identity_counter::connect(RegistryConfig::new()).await?;
///
/// let mut schema = EntitySchema::new("Book");
/// registry.plugin(&mut schema, SequenceOptions::new("Book").start_at(100))?;
/// let books = DocumentCollection::new(schema);
///
/// let book = books.insert(json!({ "title": "Dune" }).try_into()?).await?;
/// assert_eq!(book.get_i64("_id"), Some(100));
/// # Ok(())
/// # }
/// ```
pub async fn connect(config: RegistryConfig) -> Result<CounterRegistry> {
    let store = MemoryCounterStore::open(&config)?;
    CounterRegistry::open(Arc::new(store), config).await
}
