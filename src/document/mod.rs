//! Minimal document host
//!
//! Just enough of a document store to drive sequence bindings: JSON
//! documents, a schema with field constraints, save hooks, and an in-memory
//! collection that runs them.

mod collection;
mod schema;

pub use collection::DocumentCollection;
pub use schema::{EntitySchema, FieldDef, FieldKind, PRIMARY_KEY};

use crate::core::{CounterError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Whether a save creates a document or overwrites an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveKind {
    Insert,
    Update,
}

/// Runs before a document is persisted. An error aborts the save.
#[async_trait]
pub trait SaveHook: Send + Sync {
    async fn before_save(&self, doc: &mut Document, kind: SaveKind) -> Result<()>;
}

/// A JSON object document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(CounterError::TypeMismatch(format!(
                "document must be a JSON object, got {}",
                other
            ))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn id(&self) -> Option<&Value> {
        self.get(PRIMARY_KEY)
    }

    /// Integer value of `field`, if it holds one
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    pub fn into_json(self) -> Value {
        Value::Object(self.fields)
    }
}

impl TryFrom<Value> for Document {
    type Error = CounterError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_json(value)
    }
}
