use thiserror::Error;

#[derive(Error, Debug)]
pub enum CounterError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Counter registry has not been initialized")]
    NotInitialized,

    #[error("Collection '{0}' already exists")]
    CollectionExists(String),

    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Counter for '{entity_type}.{field}' not found")]
    CounterNotFound { entity_type: String, field: String },

    #[error("Document '{0}' not found")]
    DocumentNotFound(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Counter initialization failed: {0}")]
    Initialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl CounterError {
    /// True for failures of the backing store itself, as opposed to
    /// misconfiguration or rejected input.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Storage(_)
                | Self::Io(_)
                | Self::Serialization(_)
                | Self::LockError(_)
                | Self::CollectionNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CounterError>;

impl<T> From<std::sync::PoisonError<T>> for CounterError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for CounterError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for CounterError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for CounterError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
