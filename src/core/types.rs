use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a counter: the owning entity type plus the sequence field.
///
/// Ordered by `(field, entity_type)`, which is the shape of the unique index
/// over the counter collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CounterKey {
    pub field: String,
    #[serde(rename = "entityType")]
    pub entity_type: String,
}

impl CounterKey {
    pub fn new(entity_type: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            entity_type: entity_type.into(),
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity_type, self.field)
    }
}

/// Persistent counter row: `{entityType, field, count}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    #[serde(rename = "entityType")]
    pub entity_type: String,
    pub field: String,
    /// May be negative before the first allocation (`startAt - incrementBy`).
    pub count: i64,
}

impl CounterRecord {
    pub fn new(key: &CounterKey, count: i64) -> Self {
        Self {
            entity_type: key.entity_type.clone(),
            field: key.field.clone(),
            count,
        }
    }

    pub fn key(&self) -> CounterKey {
        CounterKey::new(self.entity_type.clone(), self.field.clone())
    }
}
