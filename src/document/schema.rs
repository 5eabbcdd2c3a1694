use super::{Document, SaveHook};
use crate::core::{CounterError, Result};
use crate::sequence::SequenceBinding;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const PRIMARY_KEY: &str = "_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Text,
    Any,
}

impl FieldKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Integer => match value {
                Value::Number(n) => n.is_i64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
                _ => false,
            },
            Self::Text => value.is_string(),
            Self::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub unique: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            unique: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn validate(&self, doc: &Document) -> Result<()> {
        match doc.get(&self.name) {
            None | Some(Value::Null) if self.required => Err(CounterError::ConstraintViolation(
                format!("field '{}' is required", self.name),
            )),
            None | Some(Value::Null) => Ok(()),
            Some(value) if !self.kind.accepts(value) => Err(CounterError::TypeMismatch(format!(
                "field '{}' expects {:?}, got {}",
                self.name, self.kind, value
            ))),
            Some(_) => Ok(()),
        }
    }
}

/// Shape and save hooks of one entity type.
pub struct EntitySchema {
    name: String,
    fields: Vec<FieldDef>,
    hooks: Vec<Arc<dyn SaveHook>>,
    sequences: HashMap<String, Arc<SequenceBinding>>,
}

impl EntitySchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            hooks: Vec::new(),
            sequences: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        PRIMARY_KEY
    }

    /// Declare a field, replacing any earlier declaration with the same name.
    pub fn add_field(&mut self, field: FieldDef) {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.add_field(field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.unique)
    }

    /// Hooks run in registration order on every save.
    pub fn add_hook(&mut self, hook: Arc<dyn SaveHook>) {
        self.hooks.push(hook);
    }

    pub fn hooks(&self) -> &[Arc<dyn SaveHook>] {
        &self.hooks
    }

    pub(crate) fn attach_sequence(&mut self, binding: Arc<SequenceBinding>) -> Result<()> {
        let field = binding.field().to_string();
        if self.sequences.contains_key(&field) {
            return Err(CounterError::Configuration(format!(
                "field '{}' of '{}' already has a sequence",
                field, self.name
            )));
        }
        self.hooks.push(binding.clone());
        self.sequences.insert(field, binding);
        Ok(())
    }

    /// Sequence bound to `field`. The binding serves both type-level and
    /// per-document `allocate_next`/`reset`; see also
    /// `DocumentCollection::next_count_for`.
    pub fn sequence(&self, field: &str) -> Option<&Arc<SequenceBinding>> {
        self.sequences.get(field)
    }

    pub fn validate(&self, doc: &Document) -> Result<()> {
        self.fields.iter().try_for_each(|field| field.validate(doc))
    }
}

impl std::fmt::Debug for EntitySchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitySchema")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
