//! Write-Ahead Logging (WAL) and snapshots for counter collections

use crate::core::{CounterError, CounterKey, CounterRecord, Result};
use crate::storage::table::CounterTable;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const WAL_FILE_NAME: &str = "counters.wal";
pub const SNAPSHOT_FILE_NAME: &str = "counters.snapshot";

// ============================================================================
// WAL Entry Types
// ============================================================================

/// Every entry carries absolute state, so replaying an entry twice is harmless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntry {
    CreateCollection { name: String },
    Insert { collection: String, record: CounterRecord },
    SetCount { collection: String, key: CounterKey, count: i64 },
}

// ============================================================================
// Store Snapshot
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub collections: HashMap<String, CounterTable>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: DateTime<Utc>,
    pub record_count: usize,
    pub collection_count: usize,
}

impl StoreSnapshot {
    pub fn new(collections: HashMap<String, CounterTable>) -> Self {
        let record_count = collections.values().map(|t| t.row_count()).sum();
        let collection_count = collections.len();

        Self {
            version: 1,
            collections,
            metadata: SnapshotMetadata {
                created_at: Utc::now(),
                record_count,
                collection_count,
            },
        }
    }
}

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurabilityMode {
    /// fsync after every entry
    Sync,
    /// flush to the OS after every entry
    #[default]
    Async,
    /// no WAL at all
    None,
}

// ============================================================================
// WAL Manager
// ============================================================================

pub struct WalManager {
    wal_path: PathBuf,
    wal_file: Option<BufWriter<File>>,
    durability_mode: DurabilityMode,
    entries_since_checkpoint: usize,
    checkpoint_threshold: usize,
}

impl WalManager {
    pub fn new<P: AsRef<Path>>(wal_path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let wal_path = wal_path.as_ref().to_path_buf();
        if let Some(parent) = wal_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let wal_file = if durability_mode != DurabilityMode::None {
            let file = OpenOptions::new().create(true).append(true).open(&wal_path)?;
            Some(BufWriter::new(file))
        } else {
            None
        };

        Ok(Self {
            wal_path,
            wal_file,
            durability_mode,
            entries_since_checkpoint: 0,
            checkpoint_threshold: 1000,
        })
    }

    pub fn append(&mut self, entry: &WalEntry) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let file = self
            .wal_file
            .as_mut()
            .ok_or_else(|| CounterError::Storage("WAL file not initialized".to_string()))?;
        let serialized = rmp_serde::to_vec(entry)?;
        let len = serialized.len() as u32;
        file.write_all(&len.to_le_bytes())?;
        file.write_all(&serialized)?;
        file.flush()?;
        if self.durability_mode == DurabilityMode::Sync {
            file.get_mut().sync_all()?;
        }
        self.entries_since_checkpoint += 1;
        debug!("WAL append #{}: {:?}", self.entries_since_checkpoint, entry);
        Ok(())
    }

    /// Read every complete entry. A torn tail (crash mid-append) ends the log.
    pub fn read_all(&self) -> Result<Vec<WalEntry>> {
        Ok(self.scan()?.entries)
    }

    /// Read every complete entry along with the byte length they occupy.
    pub fn scan(&self) -> Result<WalScan> {
        let mut scan = WalScan::default();
        if !self.wal_path.exists() {
            return Ok(scan);
        }
        let file = File::open(&self.wal_path)?;
        let mut reader = BufReader::new(file);
        loop {
            let mut len_bytes = [0u8; 4];
            match read_full(&mut reader, &mut len_bytes)? {
                0 => break,
                n if n < len_bytes.len() => {
                    scan.torn = true;
                    break;
                }
                _ => {}
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut data = vec![0u8; len];
            if read_full(&mut reader, &mut data)? < len {
                scan.torn = true;
                break;
            }
            let entry: WalEntry = rmp_serde::from_slice(&data)?;
            scan.entries.push(entry);
            scan.valid_len += (len_bytes.len() + len) as u64;
        }
        if scan.torn {
            warn!(
                "Ignoring truncated WAL entry at byte {} of {:?}",
                scan.valid_len, self.wal_path
            );
        }
        Ok(scan)
    }

    /// Cut the log back to `len` bytes so later appends follow the last
    /// complete entry.
    pub fn truncate_to(&mut self, len: u64) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        if let Some(mut writer) = self.wal_file.take() {
            writer.flush()?;
        }
        let file = OpenOptions::new().write(true).open(&self.wal_path)?;
        file.set_len(len)?;
        file.sync_all()?;
        drop(file);

        let file = OpenOptions::new().create(true).append(true).open(&self.wal_path)?;
        self.wal_file = Some(BufWriter::new(file));
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.wal_file = None;
        let file = OpenOptions::new().write(true).truncate(true).open(&self.wal_path)?;
        self.wal_file = Some(BufWriter::new(file));
        self.entries_since_checkpoint = 0;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.entries_since_checkpoint >= self.checkpoint_threshold
    }

    pub fn entries_since_checkpoint(&self) -> usize {
        self.entries_since_checkpoint
    }

    pub fn set_checkpoint_threshold(&mut self, threshold: usize) {
        self.checkpoint_threshold = threshold.max(1);
    }

    pub fn set_entries_since_checkpoint(&mut self, entries: usize) {
        if self.durability_mode != DurabilityMode::None {
            self.entries_since_checkpoint = entries;
        }
    }
}

/// Result of reading the WAL from the start.
#[derive(Debug, Default)]
pub struct WalScan {
    pub entries: Vec<WalEntry>,
    /// Bytes covered by complete entries
    pub valid_len: u64,
    /// A partial entry follows `valid_len`
    pub torn: bool,
}

/// Fill `buf` until it is full or the reader hits EOF; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

// ============================================================================
// Snapshot Manager
// ============================================================================

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    /// Write to a temp file in the same directory, then rename over the old snapshot.
    pub fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let dir = match self.snapshot_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let serialized = rmp_serde::to_vec(snapshot)?;
        let temp = tempfile::NamedTempFile::new_in(&dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            writer.write_all(&serialized)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.snapshot_path)
            .map_err(|e| CounterError::Io(format!("Failed to rename snapshot: {}", e)))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<StoreSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.snapshot_path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let mut snapshot: StoreSnapshot = rmp_serde::from_slice(&data)?;
        for table in snapshot.collections.values_mut() {
            table.rebuild_index()?;
        }
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

// ============================================================================
// Persistence Manager
// ============================================================================

pub struct PersistenceManager {
    wal: WalManager,
    snapshot: SnapshotManager,
    durability_mode: DurabilityMode,
}

impl PersistenceManager {
    pub fn new<P: AsRef<Path>>(data_dir: P, durability_mode: DurabilityMode) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let wal = WalManager::new(data_dir.join(WAL_FILE_NAME), durability_mode)?;
        let snapshot = SnapshotManager::new(data_dir.join(SNAPSHOT_FILE_NAME));
        Ok(Self {
            wal,
            snapshot,
            durability_mode,
        })
    }

    pub fn log(&mut self, entry: &WalEntry) -> Result<()> {
        self.wal.append(entry)
    }

    pub fn checkpoint(&mut self, collections: HashMap<String, CounterTable>) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let snapshot = StoreSnapshot::new(collections);
        info!(
            "Checkpoint: {} collections, {} counters",
            snapshot.metadata.collection_count, snapshot.metadata.record_count
        );
        self.snapshot.save(&snapshot)?;
        self.wal.clear()?;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.wal.needs_checkpoint()
    }

    /// Rebuild collections from the last snapshot plus the WAL written after it.
    ///
    /// A torn tail is cut off the WAL file, and the checkpoint counter resumes
    /// from the number of entries replayed.
    pub fn recover(&mut self) -> Result<HashMap<String, CounterTable>> {
        let mut collections = match self.snapshot.load()? {
            Some(snapshot) => snapshot.collections,
            None => HashMap::new(),
        };

        let scan = self.wal.scan()?;
        if scan.torn {
            self.wal.truncate_to(scan.valid_len)?;
        }
        let entries = scan.entries;
        let replayed = entries.len();
        self.wal.set_entries_since_checkpoint(replayed);

        for entry in entries {
            match entry {
                WalEntry::CreateCollection { name } => {
                    collections
                        .entry(name.clone())
                        .or_insert_with(|| CounterTable::new(name));
                }
                WalEntry::Insert { collection, record } => match collections.get_mut(&collection) {
                    Some(table) => {
                        if table.find(&record.key()).is_none() {
                            table.insert(record)?;
                        }
                    }
                    None => warn!("WAL insert into unknown collection '{}' skipped", collection),
                },
                WalEntry::SetCount { collection, key, count } => {
                    let applied = collections
                        .get_mut(&collection)
                        .and_then(|table| table.apply_count(&key, count));
                    if applied.is_none() {
                        warn!("WAL count update for missing counter {} skipped", key);
                    }
                }
            }
        }

        info!(
            "Recovered {} collections ({} WAL entries replayed)",
            collections.len(),
            replayed
        );
        Ok(collections)
    }

    pub fn wal(&self) -> &WalManager {
        &self.wal
    }

    pub fn wal_mut(&mut self) -> &mut WalManager {
        &mut self.wal
    }

    pub fn snapshot(&self) -> &SnapshotManager {
        &self.snapshot
    }

    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn book_key() -> CounterKey {
        CounterKey::new("Book", "_id")
    }

    #[test]
    fn test_wal_append_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let wal_path = temp_dir.path().join("test.wal");
        let mut wal = WalManager::new(&wal_path, DurabilityMode::Sync).unwrap();
        wal.append(&WalEntry::CreateCollection { name: "identitycounters".to_string() }).unwrap();
        wal.append(&WalEntry::Insert {
            collection: "identitycounters".to_string(),
            record: CounterRecord::new(&book_key(), -1),
        }).unwrap();
        wal.append(&WalEntry::SetCount {
            collection: "identitycounters".to_string(),
            key: book_key(),
            count: 0,
        }).unwrap();
        let entries = wal.read_all().unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn test_wal_disabled_in_none_mode() {
        let temp_dir = TempDir::new().unwrap();
        let wal_path = temp_dir.path().join("test.wal");
        let mut wal = WalManager::new(&wal_path, DurabilityMode::None).unwrap();
        wal.append(&WalEntry::CreateCollection { name: "c".to_string() }).unwrap();
        assert_eq!(wal.entries_since_checkpoint(), 0);
        assert!(wal.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_truncated_tail_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let wal_path = temp_dir.path().join("test.wal");
        let mut wal = WalManager::new(&wal_path, DurabilityMode::Sync).unwrap();
        wal.append(&WalEntry::CreateCollection { name: "c".to_string() }).unwrap();
        drop(wal);

        let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
        file.write_all(&64u32.to_le_bytes()).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();

        let wal = WalManager::new(&wal_path, DurabilityMode::Sync).unwrap();
        assert_eq!(wal.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_recovery_cuts_torn_tail_before_appending() {
        let temp_dir = TempDir::new().unwrap();
        let wal_path = temp_dir.path().join(WAL_FILE_NAME);
        {
            let mut persistence = PersistenceManager::new(temp_dir.path(), DurabilityMode::Sync).unwrap();
            persistence.log(&WalEntry::CreateCollection { name: "c".to_string() }).unwrap();
            persistence.log(&WalEntry::Insert {
                collection: "c".to_string(),
                record: CounterRecord::new(&book_key(), -1),
            }).unwrap();
        }
        let clean_len = fs::metadata(&wal_path).unwrap().len();

        let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
        file.write_all(&64u32.to_le_bytes()).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        drop(file);

        {
            let mut persistence = PersistenceManager::new(temp_dir.path(), DurabilityMode::Sync).unwrap();
            persistence.recover().unwrap();
            assert_eq!(fs::metadata(&wal_path).unwrap().len(), clean_len);
            persistence.log(&WalEntry::SetCount {
                collection: "c".to_string(),
                key: book_key(),
                count: 7,
            }).unwrap();
        }

        let mut persistence = PersistenceManager::new(temp_dir.path(), DurabilityMode::Sync).unwrap();
        let recovered = persistence.recover().unwrap();
        assert_eq!(recovered.get("c").unwrap().find(&book_key()).unwrap().count, 7);
        let scan = persistence.wal().scan().unwrap();
        assert_eq!(scan.entries.len(), 3);
        assert!(!scan.torn);
    }

    #[test]
    fn test_torn_length_prefix_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let wal_path = temp_dir.path().join("test.wal");
        let mut wal = WalManager::new(&wal_path, DurabilityMode::Sync).unwrap();
        wal.append(&WalEntry::CreateCollection { name: "c".to_string() }).unwrap();
        drop(wal);

        let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
        file.write_all(&[9, 0]).unwrap();

        let wal = WalManager::new(&wal_path, DurabilityMode::Sync).unwrap();
        let scan = wal.scan().unwrap();
        assert_eq!(scan.entries.len(), 1);
        assert!(scan.torn);
        assert_eq!(scan.valid_len, fs::metadata(&wal_path).unwrap().len() - 2);
    }

    #[test]
    fn test_recovery_resumes_checkpoint_count() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut persistence = PersistenceManager::new(temp_dir.path(), DurabilityMode::Sync).unwrap();
            for name in ["a", "b", "c"] {
                persistence.log(&WalEntry::CreateCollection { name: name.to_string() }).unwrap();
            }
        }

        let mut persistence = PersistenceManager::new(temp_dir.path(), DurabilityMode::Sync).unwrap();
        persistence.wal_mut().set_checkpoint_threshold(4);
        persistence.recover().unwrap();
        assert_eq!(persistence.wal().entries_since_checkpoint(), 3);
        assert!(!persistence.needs_checkpoint());

        persistence.log(&WalEntry::CreateCollection { name: "d".to_string() }).unwrap();
        assert!(persistence.needs_checkpoint());
    }

    #[test]
    fn test_checkpoint_clears_wal() {
        let temp_dir = TempDir::new().unwrap();
        let mut persistence = PersistenceManager::new(temp_dir.path(), DurabilityMode::Sync).unwrap();
        persistence.log(&WalEntry::CreateCollection { name: "c".to_string() }).unwrap();
        assert_eq!(persistence.wal().entries_since_checkpoint(), 1);

        let mut collections = HashMap::new();
        collections.insert("c".to_string(), CounterTable::new("c"));
        persistence.checkpoint(collections).unwrap();

        assert_eq!(persistence.wal().entries_since_checkpoint(), 0);
        assert!(persistence.snapshot().exists());
        assert!(persistence.wal().read_all().unwrap().is_empty());
    }

    #[test]
    fn test_recovery_replays_wal_over_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let mut persistence = PersistenceManager::new(temp_dir.path(), DurabilityMode::Sync).unwrap();

        let mut table = CounterTable::new("identitycounters");
        table.insert(CounterRecord::new(&book_key(), 4)).unwrap();
        let mut collections = HashMap::new();
        collections.insert("identitycounters".to_string(), table);
        persistence.checkpoint(collections).unwrap();

        persistence.log(&WalEntry::SetCount {
            collection: "identitycounters".to_string(),
            key: book_key(),
            count: 5,
        }).unwrap();
        let author = CounterKey::new("Author", "_id");
        persistence.log(&WalEntry::Insert {
            collection: "identitycounters".to_string(),
            record: CounterRecord::new(&author, -1),
        }).unwrap();

        let recovered = persistence.recover().unwrap();
        let table = recovered.get("identitycounters").unwrap();
        assert_eq!(table.find(&book_key()).unwrap().count, 5);
        assert_eq!(table.find(&author).unwrap().count, -1);
    }
}
