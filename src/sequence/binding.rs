use super::gate::{ReadyGate, ReadyState};
use super::options::SequenceOptions;
use crate::core::{CounterError, CounterKey, Result};
use crate::document::{Document, SaveHook, SaveKind};
use crate::registry::CounterRegistry;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, info_span, Instrument};

/// What the creation hook did with a new document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// The field was empty and received this freshly allocated value.
    Generated(i64),
    /// The document brought its own value; `raised` tells whether the
    /// counter watermark had to move up to it.
    Explicit { value: i64, raised: bool },
}

/// Binding of one entity field to its counter record.
///
/// Created by [`CounterRegistry::plugin`]. The counter record is ensured in
/// the background; creation hooks wait for that to finish.
pub struct SequenceBinding {
    options: SequenceOptions,
    key: CounterKey,
    initial_count: i64,
    registry: CounterRegistry,
    gate: ReadyGate,
}

impl SequenceBinding {
    pub(crate) fn new(registry: CounterRegistry, options: SequenceOptions) -> Result<Self> {
        options.validate()?;
        let initial_count = options.initial_count()?;
        Ok(Self {
            key: options.key(),
            initial_count,
            options,
            registry,
            gate: ReadyGate::new(),
        })
    }

    /// Spawn the one-time ensure-counter call on the current runtime.
    pub(crate) fn start(self: &Arc<Self>) -> Result<()> {
        let handle = Handle::try_current().map_err(|e| {
            CounterError::Configuration(format!("sequence bindings need a tokio runtime: {}", e))
        })?;
        if !self.gate.begin() {
            return Ok(());
        }

        let binding = Arc::clone(self);
        let span = info_span!(
            "ensure_counter",
            entity_type = %self.key.entity_type,
            field = %self.key.field
        );
        handle.spawn(async move { binding.initialize().await }.instrument(span));
        Ok(())
    }

    async fn initialize(&self) {
        match self
            .registry
            .ensure_counter(&self.key, self.initial_count)
            .await
        {
            Ok(()) => {
                debug!("counter ready");
                self.gate.open();
            }
            Err(err) => {
                error!(error = %err, "error initializing counter");
                self.gate.fail(err.to_string());
            }
        }
    }

    pub fn options(&self) -> &SequenceOptions {
        &self.options
    }

    pub fn key(&self) -> &CounterKey {
        &self.key
    }

    pub fn field(&self) -> &str {
        &self.options.field
    }

    pub fn ready_state(&self) -> ReadyState {
        self.gate.state()
    }

    pub fn is_ready(&self) -> bool {
        self.gate.state() == ReadyState::Ready
    }

    /// Wait until the counter record exists. Fails with
    /// `CounterError::Initialization` if creating it failed.
    pub async fn wait_ready(&self) -> Result<()> {
        self.gate.wait().await
    }

    /// Preview the value the next creation would receive.
    ///
    /// Reserves nothing and does not wait for readiness: before the counter
    /// exists this reports `start_at`.
    pub async fn allocate_next(&self) -> Result<i64> {
        self.registry.preview_next(&self.options).await
    }

    /// Rewind the counter so the next creation receives `start_at` again.
    pub async fn reset(&self) -> Result<i64> {
        self.gate.wait().await?;
        self.registry.reset_to(&self.key, self.initial_count).await?;
        Ok(self.options.start_at)
    }

    /// Assign or reconcile the sequence value of a document being created.
    pub async fn assign(&self, doc: &mut Document) -> Result<Assignment> {
        self.gate.wait().await?;

        let explicit = explicit_value(doc.get(&self.options.field), &self.options.field)?;
        match explicit {
            Some(value) => {
                let raised = self.registry.raise_to(&self.key, value).await?;
                Ok(Assignment::Explicit { value, raised })
            }
            None => {
                let value = self
                    .registry
                    .increment_and_get(&self.key, self.options.increment_by)
                    .await?;
                doc.set(self.options.field.clone(), Value::from(value));
                Ok(Assignment::Generated(value))
            }
        }
    }
}

/// Integer carried by the field, if any. Non-numeric values count as absent.
fn explicit_value(value: Option<&Value>, field: &str) -> Result<Option<i64>> {
    let Some(Value::Number(number)) = value else {
        return Ok(None);
    };
    if let Some(value) = number.as_i64() {
        return Ok(Some(value));
    }
    match number.as_f64() {
        Some(float) if float.fract() == 0.0 && float >= i64::MIN as f64 && float < i64::MAX as f64 => {
            Ok(Some(float as i64))
        }
        _ => Err(CounterError::TypeMismatch(format!(
            "sequence field '{}' must hold an integer, got {}",
            field, number
        ))),
    }
}

#[async_trait]
impl SaveHook for SequenceBinding {
    async fn before_save(&self, doc: &mut Document, kind: SaveKind) -> Result<()> {
        if kind != SaveKind::Insert {
            return Ok(());
        }
        self.assign(doc).await.map(|_| ())
    }
}

impl std::fmt::Debug for SequenceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceBinding")
            .field("options", &self.options)
            .field("state", &self.gate.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_explicit_value_classification() {
        assert_eq!(explicit_value(None, "_id").unwrap(), None);
        assert_eq!(explicit_value(Some(&json!(null)), "_id").unwrap(), None);
        assert_eq!(explicit_value(Some(&json!("12")), "_id").unwrap(), None);
        assert_eq!(explicit_value(Some(&json!(12)), "_id").unwrap(), Some(12));
        assert_eq!(explicit_value(Some(&json!(-3)), "_id").unwrap(), Some(-3));
        assert_eq!(explicit_value(Some(&json!(7.0)), "_id").unwrap(), Some(7));
        assert!(matches!(
            explicit_value(Some(&json!(7.5)), "_id"),
            Err(CounterError::TypeMismatch(_))
        ));
        assert!(explicit_value(Some(&json!(u64::MAX)), "_id").is_err());
    }
}
