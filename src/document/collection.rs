use super::{Document, EntitySchema, SaveKind, PRIMARY_KEY};
use crate::core::{CounterError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory collection of documents of one entity type.
///
/// Save hooks run outside the collection lock; the uniqueness checks and
/// the write itself happen under it.
pub struct DocumentCollection {
    schema: Arc<EntitySchema>,
    docs: RwLock<BTreeMap<String, Document>>,
}

/// Comparable form of a value, so that `7` and `7.0` collide.
fn index_key(value: &Value) -> String {
    match value {
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => (f as i64).to_string(),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

impl DocumentCollection {
    pub fn new(schema: EntitySchema) -> Self {
        Self {
            schema: Arc::new(schema),
            docs: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    async fn run_hooks(&self, doc: &mut Document, kind: SaveKind) -> Result<()> {
        for hook in self.schema.hooks() {
            hook.before_save(doc, kind).await?;
        }
        Ok(())
    }

    fn check_unique(&self, docs: &BTreeMap<String, Document>, doc: &Document, own_id: &str) -> Result<()> {
        for field in self.schema.unique_fields() {
            let Some(value) = doc.get(&field.name).filter(|v| !v.is_null()) else {
                continue;
            };
            let wanted = index_key(value);
            let clash = docs.iter().any(|(id, other)| {
                id != own_id && other.get(&field.name).map(index_key).as_deref() == Some(wanted.as_str())
            });
            if clash {
                return Err(CounterError::ConstraintViolation(format!(
                    "duplicate value {} for unique field '{}.{}'",
                    value,
                    self.schema.name(),
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Create a document. Hooks see `SaveKind::Insert`; a document without
    /// `_id` after the hooks ran gets a UUID.
    pub async fn insert(&self, mut doc: Document) -> Result<Document> {
        self.run_hooks(&mut doc, SaveKind::Insert).await?;

        if doc.id().is_none_or(Value::is_null) {
            doc.set(PRIMARY_KEY, Uuid::new_v4().to_string());
        }
        self.schema.validate(&doc)?;

        let id = doc.id().map(index_key).unwrap_or_default();
        let mut docs = self.docs.write().await;
        if docs.contains_key(&id) {
            return Err(CounterError::ConstraintViolation(format!(
                "duplicate {} {} in '{}'",
                PRIMARY_KEY,
                id,
                self.schema.name()
            )));
        }
        self.check_unique(&docs, &doc, &id)?;
        docs.insert(id, doc.clone());
        Ok(doc)
    }

    /// Overwrite an existing document, matched by `_id`.
    pub async fn save(&self, mut doc: Document) -> Result<Document> {
        let id = doc
            .id()
            .map(index_key)
            .ok_or_else(|| CounterError::DocumentNotFound("<missing _id>".to_string()))?;
        if !self.docs.read().await.contains_key(&id) {
            return Err(CounterError::DocumentNotFound(id));
        }

        self.run_hooks(&mut doc, SaveKind::Update).await?;
        self.schema.validate(&doc)?;

        let mut docs = self.docs.write().await;
        if !docs.contains_key(&id) {
            return Err(CounterError::DocumentNotFound(id));
        }
        self.check_unique(&docs, &doc, &id)?;
        docs.insert(id, doc.clone());
        Ok(doc)
    }

    pub async fn get(&self, id: &Value) -> Option<Document> {
        self.docs.read().await.get(&index_key(id)).cloned()
    }

    pub async fn all(&self) -> Vec<Document> {
        self.docs.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    fn sequence_for(&self, field: Option<&str>) -> Result<&Arc<crate::sequence::SequenceBinding>> {
        let field = field.unwrap_or(PRIMARY_KEY);
        self.schema.sequence(field).ok_or_else(|| {
            CounterError::Configuration(format!(
                "no sequence on '{}.{}'",
                self.schema.name(),
                field
            ))
        })
    }

    /// Preview of the next value for `field` (primary key when `None`)
    pub async fn next_count(&self, field: Option<&str>) -> Result<i64> {
        self.sequence_for(field)?.allocate_next().await
    }

    /// Reset the sequence on `field` (primary key when `None`)
    pub async fn reset_count(&self, field: Option<&str>) -> Result<i64> {
        self.sequence_for(field)?.reset().await
    }

    /// `next_count` reached through one of this collection's documents.
    ///
    /// Counters are per entity type, so the document does not change the
    /// answer; it must belong to this collection's entity though.
    pub async fn next_count_for(&self, doc: &Document, field: Option<&str>) -> Result<i64> {
        self.check_owner(doc).await?;
        self.next_count(field).await
    }

    /// `reset_count` reached through one of this collection's documents.
    pub async fn reset_count_for(&self, doc: &Document, field: Option<&str>) -> Result<i64> {
        self.check_owner(doc).await?;
        self.reset_count(field).await
    }

    async fn check_owner(&self, doc: &Document) -> Result<()> {
        let Some(id) = doc.id() else {
            return Ok(());
        };
        let key = index_key(id);
        if self.docs.read().await.contains_key(&key) {
            Ok(())
        } else {
            Err(CounterError::DocumentNotFound(key))
        }
    }
}
