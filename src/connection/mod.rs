pub mod config;

pub use config::{DEFAULT_COLLECTION, RegistryConfig};
