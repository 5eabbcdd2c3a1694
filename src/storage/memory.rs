use super::engine::CounterStore;
use super::persistence::{PersistenceManager, WalEntry};
use super::table::CounterTable;
use crate::connection::RegistryConfig;
use crate::core::{CounterError, CounterKey, CounterRecord, Result};
use async_trait::async_trait;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// In-process counter store.
///
/// Each collection sits behind its own lock, so one write lock covers a whole
/// read-modify-write. When opened with a data directory every mutation is
/// written to the WAL before it is applied.
///
/// Lock order is persistence -> collection map -> collection.
pub struct MemoryCounterStore {
    collections: RwLock<HashMap<String, Arc<RwLock<CounterTable>>>>,
    persistence: Option<Arc<Mutex<PersistenceManager>>>,
}

impl MemoryCounterStore {
    /// Non-durable store
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            persistence: None,
        }
    }

    /// Open a store as described by `config`, recovering previous state when
    /// a data directory is configured.
    pub fn open(config: &RegistryConfig) -> Result<Self> {
        config.validate()?;
        let Some(dir) = &config.data_dir else {
            return Ok(Self::new());
        };

        let mut persistence = PersistenceManager::new(dir, config.durability_mode)?;
        persistence.wal_mut().set_checkpoint_threshold(config.checkpoint_threshold);
        let recovered = persistence.recover()?;
        if persistence.needs_checkpoint() {
            persistence.checkpoint(recovered.clone())?;
        }
        info!("Opened counter store at {:?} ({} collections)", dir, recovered.len());

        let collections = recovered
            .into_iter()
            .map(|(name, table)| (name, Arc::new(RwLock::new(table))))
            .collect();

        Ok(Self {
            collections: RwLock::new(collections),
            persistence: Some(Arc::new(Mutex::new(persistence))),
        })
    }

    pub fn is_durable(&self) -> bool {
        self.persistence.is_some()
    }

    /// Snapshot every collection and truncate the WAL
    pub async fn checkpoint(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let mut wal = persistence.lock().await;
        self.checkpoint_locked(&mut wal).await
    }

    async fn checkpoint_locked(&self, wal: &mut PersistenceManager) -> Result<()> {
        let handles: Vec<(String, Arc<RwLock<CounterTable>>)> = {
            let collections = self.collections.read().await;
            collections
                .iter()
                .map(|(name, handle)| (name.clone(), Arc::clone(handle)))
                .collect()
        };

        let mut tables = HashMap::with_capacity(handles.len());
        for (name, handle) in handles {
            let table = handle.read().await;
            tables.insert(name, table.clone());
        }
        wal.checkpoint(tables)
    }

    async fn lock_persistence(&self) -> Option<MutexGuard<'_, PersistenceManager>> {
        match &self.persistence {
            Some(persistence) => Some(persistence.lock().await),
            None => None,
        }
    }

    async fn table(&self, name: &str) -> Result<Arc<RwLock<CounterTable>>> {
        self.collections
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| CounterError::CollectionNotFound(name.to_string()))
    }

    async fn maybe_checkpoint(&self, wal: Option<MutexGuard<'_, PersistenceManager>>) -> Result<()> {
        if let Some(mut wal) = wal
            && wal.needs_checkpoint()
        {
            self.checkpoint_locked(&mut wal).await?;
        }
        Ok(())
    }

    /// Apply a planned count change: log it, then write it.
    async fn write_count<F>(&self, collection: &str, key: &CounterKey, plan: F) -> Result<Option<i64>>
    where
        F: FnOnce(&CounterTable) -> Result<Option<i64>> + Send,
    {
        let mut wal = self.lock_persistence().await;
        let handle = self.table(collection).await?;

        let applied = {
            let mut table = handle.write().await;
            match plan(&*table)? {
                Some(count) => {
                    if let Some(wal) = wal.as_mut() {
                        wal.log(&WalEntry::SetCount {
                            collection: collection.to_string(),
                            key: key.clone(),
                            count,
                        })?;
                    }
                    table.apply_count(key, count)
                }
                None => None,
            }
        };

        self.maybe_checkpoint(wal).await?;
        Ok(applied)
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn create_collection(&self, name: &str) -> Result<()> {
        let mut wal = self.lock_persistence().await;
        {
            let mut collections = self.collections.write().await;
            if collections.contains_key(name) {
                return Err(CounterError::CollectionExists(name.to_string()));
            }
            if let Some(wal) = wal.as_mut() {
                wal.log(&WalEntry::CreateCollection { name: name.to_string() })?;
            }
            collections.insert(name.to_string(), Arc::new(RwLock::new(CounterTable::new(name))));
        }
        debug!("Created counter collection '{}'", name);
        self.maybe_checkpoint(wal).await
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn insert(&self, collection: &str, record: CounterRecord) -> Result<()> {
        let mut wal = self.lock_persistence().await;
        let handle = self.table(collection).await?;
        {
            let mut table = handle.write().await;
            // A duplicate is rejected by the unique index below, unlogged
            if table.find(&record.key()).is_none()
                && let Some(wal) = wal.as_mut()
            {
                wal.log(&WalEntry::Insert {
                    collection: collection.to_string(),
                    record: record.clone(),
                })?;
            }
            table.insert(record)?;
        }
        self.maybe_checkpoint(wal).await
    }

    async fn find(&self, collection: &str, key: &CounterKey) -> Result<Option<CounterRecord>> {
        let handle = self.table(collection).await?;
        let table = handle.read().await;
        Ok(table.find(key).cloned())
    }

    async fn increment(&self, collection: &str, key: &CounterKey, by: i64) -> Result<Option<i64>> {
        self.write_count(collection, key, |table| table.plan_increment(key, by))
            .await
    }

    async fn raise_to(&self, collection: &str, key: &CounterKey, value: i64) -> Result<bool> {
        let applied = self
            .write_count(collection, key, |table| Ok(table.plan_raise(key, value)))
            .await?;
        Ok(applied.is_some())
    }

    async fn set(&self, collection: &str, key: &CounterKey, value: i64) -> Result<Option<i64>> {
        self.write_count(collection, key, |table| Ok(table.find(key).map(|_| value)))
            .await
    }

    async fn list(&self, collection: &str) -> Result<Vec<CounterRecord>> {
        let handle = self.table(collection).await?;
        let table = handle.read().await;
        Ok(table.records())
    }
}
