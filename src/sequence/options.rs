use crate::core::{CounterError, CounterKey, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Field used when the options name none: the entity's primary key.
pub const DEFAULT_FIELD: &str = "_id";

lazy_static! {
    static ref NAME_PATTERN: Regex = Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$\-]*$").unwrap();
}

fn default_field() -> String {
    DEFAULT_FIELD.to_string()
}

fn default_increment() -> i64 {
    1
}

fn default_unique() -> bool {
    true
}

/// Settings of one sequence binding.
///
/// A bare entity-type name converts into options with every default:
///
/// ```
/// use identity_counter::SequenceOptions;
///
/// let shorthand: SequenceOptions = "Book".into();
/// let explicit = SequenceOptions::new("Book").field("_id").start_at(0).increment_by(1);
/// assert_eq!(shorthand, explicit);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceOptions {
    pub entity_type: String,
    #[serde(default = "default_field")]
    pub field: String,
    #[serde(default)]
    pub start_at: i64,
    #[serde(default = "default_increment")]
    pub increment_by: i64,
    /// Add a unique constraint on the field (ignored for the primary key,
    /// which is always unique)
    #[serde(default = "default_unique")]
    pub unique: bool,
}

impl SequenceOptions {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            field: default_field(),
            start_at: 0,
            increment_by: default_increment(),
            unique: default_unique(),
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    pub fn start_at(mut self, start_at: i64) -> Self {
        self.start_at = start_at;
        self
    }

    pub fn increment_by(mut self, increment_by: i64) -> Self {
        self.increment_by = increment_by;
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn key(&self) -> CounterKey {
        CounterKey::new(self.entity_type.clone(), self.field.clone())
    }

    /// Count stored in a fresh or reset counter, so the first allocation
    /// yields `start_at`.
    pub fn initial_count(&self) -> Result<i64> {
        self.start_at.checked_sub(self.increment_by).ok_or_else(|| {
            CounterError::Configuration(format!(
                "startAt {} minus incrementBy {} overflows",
                self.start_at, self.increment_by
            ))
        })
    }

    /// Value the next allocation yields when the counter holds `current`;
    /// `start_at` when no counter exists yet.
    pub fn next_after(&self, current: Option<i64>) -> Result<i64> {
        match current {
            Some(count) => count.checked_add(self.increment_by).ok_or_else(|| {
                CounterError::Storage(format!("counter {} overflowed", self.key()))
            }),
            None => Ok(self.start_at),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.entity_type.trim().is_empty() {
            return Err(CounterError::Configuration("entity type must be set".to_string()));
        }
        if !NAME_PATTERN.is_match(&self.entity_type) {
            return Err(CounterError::Configuration(format!(
                "invalid entity type name '{}'",
                self.entity_type
            )));
        }
        if !NAME_PATTERN.is_match(&self.field) {
            return Err(CounterError::Configuration(format!(
                "invalid sequence field name '{}'",
                self.field
            )));
        }
        if self.increment_by <= 0 {
            return Err(CounterError::Configuration(format!(
                "incrementBy must be positive, got {}",
                self.increment_by
            )));
        }
        self.initial_count()?;
        Ok(())
    }
}

impl From<&str> for SequenceOptions {
    fn from(entity_type: &str) -> Self {
        Self::new(entity_type)
    }
}

impl From<String> for SequenceOptions {
    fn from(entity_type: String) -> Self {
        Self::new(entity_type)
    }
}
