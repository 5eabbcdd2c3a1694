/// Durability tests
///
/// Counters kept in a data directory survive a restart of the process
/// Run with: cargo test --test durability_tests

use identity_counter::{
    DocumentCollection, DurabilityMode, EntitySchema, RegistryConfig, SequenceOptions, connect,
};
use serde_json::json;
use std::fs::{self, OpenOptions};
use std::io::Write;
use tempfile::tempdir;

async fn open_books(config: &RegistryConfig) -> DocumentCollection {
    let registry = connect(config.clone()).await.unwrap();
    let mut schema = EntitySchema::new("Book");
    registry
        .plugin(&mut schema, SequenceOptions::new("Book").start_at(1))
        .unwrap()
        .wait_ready()
        .await
        .unwrap();
    DocumentCollection::new(schema)
}

#[tokio::test]
async fn test_sequence_continues_after_restart() {
    let dir = tempdir().unwrap();
    let config = RegistryConfig::new()
        .data_dir(dir.path())
        .durability_mode(DurabilityMode::Sync);

    {
        let books = open_books(&config).await;
        for _ in 0..3 {
            books.insert(json!({ "title": "t" }).try_into().unwrap()).await.unwrap();
        }
        books
            .insert(json!({ "_id": 50, "title": "manual" }).try_into().unwrap())
            .await
            .unwrap();
    }

    let books = open_books(&config).await;
    assert_eq!(books.next_count(None).await.unwrap(), 51);
    let book = books.insert(json!({ "title": "t" }).try_into().unwrap()).await.unwrap();
    assert_eq!(book.get_i64("_id"), Some(51));
}

#[tokio::test]
async fn test_reset_survives_restart_across_checkpoints() {
    let dir = tempdir().unwrap();
    let config = RegistryConfig::new()
        .data_dir(dir.path())
        .durability_mode(DurabilityMode::Sync)
        .checkpoint_threshold(4);

    {
        let books = open_books(&config).await;
        for _ in 0..10 {
            books.insert(json!({}).try_into().unwrap()).await.unwrap();
        }
        assert_eq!(books.reset_count(None).await.unwrap(), 1);
    }

    let books = open_books(&config).await;
    assert_eq!(books.next_count(None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_in_memory_registry_forgets() {
    let config = RegistryConfig::new();

    {
        let books = open_books(&config).await;
        books.insert(json!({}).try_into().unwrap()).await.unwrap();
    }

    let books = open_books(&config).await;
    assert_eq!(books.next_count(None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_torn_wal_tail_survives_further_restarts() {
    let dir = tempdir().unwrap();
    let config = RegistryConfig::new()
        .data_dir(dir.path())
        .durability_mode(DurabilityMode::Sync);

    {
        let books = open_books(&config).await;
        books.insert(json!({}).try_into().unwrap()).await.unwrap();
        books.insert(json!({}).try_into().unwrap()).await.unwrap();
    }

    // Crash in the middle of an append: a length prefix with a short payload
    let mut wal = OpenOptions::new()
        .append(true)
        .open(dir.path().join("counters.wal"))
        .unwrap();
    wal.write_all(&64u32.to_le_bytes()).unwrap();
    wal.write_all(&[1, 2, 3]).unwrap();
    drop(wal);

    {
        let books = open_books(&config).await;
        for expected in 3..=7 {
            let book = books.insert(json!({}).try_into().unwrap()).await.unwrap();
            assert_eq!(book.get_i64("_id"), Some(expected));
        }
    }

    let books = open_books(&config).await;
    assert_eq!(books.next_count(None).await.unwrap(), 8);
}

#[tokio::test]
async fn test_short_lived_processes_still_checkpoint() {
    let dir = tempdir().unwrap();
    let config = RegistryConfig::new()
        .data_dir(dir.path())
        .durability_mode(DurabilityMode::Sync)
        .checkpoint_threshold(10);

    for _ in 0..4 {
        let books = open_books(&config).await;
        for _ in 0..4 {
            books.insert(json!({}).try_into().unwrap()).await.unwrap();
        }
    }

    assert!(dir.path().join("counters.snapshot").exists());
    let wal_len = fs::metadata(dir.path().join("counters.wal")).unwrap().len();
    let books = open_books(&config).await;
    assert_eq!(books.next_count(None).await.unwrap(), 17);
    assert!(fs::metadata(dir.path().join("counters.wal")).unwrap().len() <= wal_len);
}
