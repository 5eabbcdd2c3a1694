use crate::core::{CounterError, CounterKey, CounterRecord, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One counter collection.
///
/// Rows are addressed by a row id; the unique `(field, entityType)` index maps
/// keys to row ids and is rebuilt after deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterTable {
    name: String,
    rows: BTreeMap<usize, CounterRecord>,
    next_row_id: usize,
    #[serde(skip)]
    unique_index: BTreeMap<CounterKey, usize>,
}

impl CounterTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: BTreeMap::new(),
            next_row_id: 0,
            unique_index: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert(&mut self, record: CounterRecord) -> Result<usize> {
        let key = record.key();
        if self.unique_index.contains_key(&key) {
            return Err(CounterError::ConstraintViolation(format!(
                "duplicate key in '{}': (field, entityType) = ({}, {})",
                self.name, key.field, key.entity_type
            )));
        }

        let id = self.next_row_id;
        self.next_row_id += 1;
        self.rows.insert(id, record);
        self.unique_index.insert(key, id);
        Ok(id)
    }

    pub fn find(&self, key: &CounterKey) -> Option<&CounterRecord> {
        self.unique_index.get(key).and_then(|id| self.rows.get(id))
    }

    /// Count that an increment by `by` would produce, without applying it.
    pub fn plan_increment(&self, key: &CounterKey, by: i64) -> Result<Option<i64>> {
        match self.find(key) {
            Some(record) => record
                .count
                .checked_add(by)
                .map(Some)
                .ok_or_else(|| CounterError::Storage(format!("counter {} overflowed", key))),
            None => Ok(None),
        }
    }

    /// Count a watermark raise would produce; `None` when nothing would change.
    pub fn plan_raise(&self, key: &CounterKey, value: i64) -> Option<i64> {
        self.find(key)
            .filter(|record| record.count < value)
            .map(|_| value)
    }

    /// Overwrite the count of an existing record.
    pub fn apply_count(&mut self, key: &CounterKey, count: i64) -> Option<i64> {
        let id = *self.unique_index.get(key)?;
        let record = self.rows.get_mut(&id)?;
        record.count = count;
        Some(count)
    }

    pub fn records(&self) -> Vec<CounterRecord> {
        self.unique_index
            .values()
            .filter_map(|id| self.rows.get(id))
            .cloned()
            .collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Restore the unique index after loading rows from disk.
    pub fn rebuild_index(&mut self) -> Result<()> {
        self.unique_index.clear();
        for (id, record) in &self.rows {
            if self.unique_index.insert(record.key(), *id).is_some() {
                return Err(CounterError::ConstraintViolation(format!(
                    "duplicate key {} while rebuilding '{}'",
                    record.key(),
                    self.name
                )));
            }
        }
        Ok(())
    }
}
