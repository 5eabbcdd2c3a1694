pub mod error;
pub mod types;

pub use error::{CounterError, Result};
pub use types::{CounterKey, CounterRecord};
