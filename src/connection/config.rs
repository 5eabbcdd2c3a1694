use crate::core::{CounterError, Result};
use crate::storage::DurabilityMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_COLLECTION: &str = "identitycounters";

/// Counter registry configuration
///
/// Built in code with the setters below, or read from a JSON file:
///
/// ```json
/// { "collection": "identitycounters", "dataDir": "/var/lib/app", "durabilityMode": "sync" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryConfig {
    /// Name of the collection holding counter records
    pub collection: String,

    /// Directory for WAL and snapshot files. `None` keeps counters in memory only.
    pub data_dir: Option<PathBuf>,

    /// How eagerly WAL entries reach the disk
    pub durability_mode: DurabilityMode,

    /// WAL entries written before a snapshot is taken
    pub checkpoint_threshold: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            data_dir: None,
            durability_mode: DurabilityMode::default(),
            checkpoint_threshold: 1000,
        }
    }
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the counter collection name
    pub fn collection(mut self, collection: &str) -> Self {
        self.collection = collection.to_string();
        self
    }

    /// Persist counters under `dir`
    pub fn data_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.data_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set durability mode
    pub fn durability_mode(mut self, mode: DurabilityMode) -> Self {
        self.durability_mode = mode;
        self
    }

    /// Set checkpoint threshold
    pub fn checkpoint_threshold(mut self, threshold: usize) -> Self {
        self.checkpoint_threshold = threshold;
        self
    }

    /// Load a JSON config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| CounterError::Configuration(format!("invalid config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.collection.trim().is_empty() {
            return Err(CounterError::Configuration(
                "counter collection name must not be empty".to_string(),
            ));
        }
        if self.checkpoint_threshold == 0 {
            return Err(CounterError::Configuration(
                "checkpoint threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_durable(&self) -> bool {
        self.data_dir.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::new();
        assert_eq!(config.collection, "identitycounters");
        assert_eq!(config.durability_mode, DurabilityMode::Async);
        assert!(!config.is_durable());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = RegistryConfig::new()
            .collection("seq")
            .data_dir("/tmp/counters")
            .durability_mode(DurabilityMode::Sync)
            .checkpoint_threshold(10);

        assert_eq!(config.collection, "seq");
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/counters")));
        assert_eq!(config.durability_mode, DurabilityMode::Sync);
        assert_eq!(config.checkpoint_threshold, 10);
    }

    #[test]
    fn test_from_json_partial() {
        let config: RegistryConfig =
            serde_json::from_str(r#"{ "dataDir": "/data", "durabilityMode": "none" }"#).unwrap();
        assert_eq!(config.collection, DEFAULT_COLLECTION);
        assert_eq!(config.durability_mode, DurabilityMode::None);
        assert!(config.is_durable());
    }

    #[test]
    fn test_from_file_rejects_empty_collection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters.json");
        std::fs::write(&path, r#"{ "collection": "  " }"#).unwrap();

        let err = RegistryConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, CounterError::Configuration(_)));
    }
}
