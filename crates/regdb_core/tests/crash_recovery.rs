//! Recovery from writers that died part way through a commit.

use regdb_core::engine::LogRecord;
use regdb_core::{
    Config, EngineOptions, RegistryError, RegistryStore, SequenceNumber, StorageEngine,
    SubkeyList, ValueData, ValueList,
};
use regdb_storage::{FileBackend, InMemoryBackend};
use regdb_testkit::prelude::*;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;

fn append_raw(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

#[test]
fn crash_mid_commit_keeps_previous_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("registry.db");

    let backend = CrashingBackend::new(Box::new(FileBackend::open(&path).unwrap()));
    let switch = backend.switch();
    let engine = StorageEngine::with_backend(Box::new(backend), EngineOptions::default()).unwrap();

    engine.store("A", b"committed").unwrap();
    let committed_len = fs::metadata(&path).unwrap().len();

    switch.arm(10);
    assert!(engine.store("B", b"lost").is_err());
    assert!(switch.has_crashed());
    assert_eq!(engine.current_seqnum(), SequenceNumber::new(1));
    drop(engine);

    assert_eq!(fs::metadata(&path).unwrap().len(), committed_len + 10);

    let recovered = StorageEngine::open(&path, EngineOptions::default()).unwrap();
    assert_eq!(recovered.fetch("A").unwrap(), Some(b"committed".to_vec()));
    assert_eq!(recovered.fetch("B").unwrap(), None);
    assert_eq!(recovered.current_seqnum(), SequenceNumber::new(1));

    recovered.store("C", b"after").unwrap();
    drop(recovered);

    let reopened = StorageEngine::open(&path, EngineOptions::default()).unwrap();
    assert_eq!(reopened.fetch("C").unwrap(), Some(b"after".to_vec()));
    assert_eq!(reopened.current_seqnum(), SequenceNumber::new(2));
    assert_eq!(reopened.len().unwrap(), 2);
}

#[test]
fn batch_without_commit_is_ignored_then_cut() {
    let registry = TestRegistry::new();
    let seq = registry.current_seqnum();
    let clean = fs::read(registry.path()).unwrap();

    let orphan = LogRecord::Put {
        key: "HKU".to_string(),
        value: b"garbage".to_vec(),
    }
    .encode()
    .unwrap();
    append_raw(registry.path(), &orphan);

    let peer = registry.open_peer();
    assert!(peer.fetch_subkeys("HKU").unwrap().is_empty());
    assert_eq!(peer.current_seqnum(), seq);

    peer.store_subkeys("HKU", &SubkeyList::from_names(["S-1-5-18"]))
        .unwrap();

    let after = fs::read(registry.path()).unwrap();
    assert!(after.len() > clean.len());
    assert!(after.starts_with(&clean));
    assert!(!after.windows(b"garbage".len()).any(|w| w == b"garbage"));

    assert_eq!(registry.fetch_subkeys("HKU").unwrap().names(), ["S-1-5-18"]);
}

#[test]
fn random_tail_is_ignored() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("registry.db");
    {
        let store = RegistryStore::open(&path, Config::default()).unwrap();
        store
            .store_subkeys("HKCR", &SubkeyList::from_names([".doc"]))
            .unwrap();
    }
    append_raw(&path, b"RGLG\x01\x00\x01\xff\xff");

    let store = RegistryStore::open(&path, Config::default()).unwrap();
    assert_eq!(store.fetch_subkeys("HKCR").unwrap().names(), [".doc"]);
}

#[test]
fn newer_format_is_refused() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("registry.db");
    drop(RegistryStore::open(&path, Config::default()).unwrap());

    let mut record = LogRecord::Delete {
        key: "X".to_string(),
    }
    .encode()
    .unwrap();
    record[4..6].copy_from_slice(&99u16.to_le_bytes());
    append_raw(&path, &record);

    assert!(matches!(
        RegistryStore::open(&path, Config::default()),
        Err(RegistryError::InvalidFormat { .. })
    ));
}

#[test]
fn failed_subkey_update_changes_nothing() {
    let backend = CrashingBackend::new(Box::new(InMemoryBackend::new()));
    let switch = backend.switch();
    let config = Config::default();
    let engine = StorageEngine::with_backend(Box::new(backend), config.engine_options()).unwrap();
    let store = RegistryStore::with_engine(engine, config).unwrap();

    store
        .store_subkeys("P", &SubkeyList::from_names(["C", "K"]))
        .unwrap();
    let mut values = ValueList::new();
    values.set("Keep", &ValueData::Dword(7));
    store.store_values(r"P\C", &values).unwrap();
    let seq = store.current_seqnum();

    switch.refuse_syncs(true);
    let desired = SubkeyList::from_names(["K", "N"]);
    assert!(store.store_subkeys("P", &desired).is_err());

    assert_eq!(store.current_seqnum(), seq);
    assert_eq!(store.fetch_subkeys("P").unwrap().names(), ["C", "K"]);
    assert!(store.key_exists(r"P\C").unwrap());
    assert!(!store.key_exists(r"P\N").unwrap());
    assert_eq!(
        store.fetch_values(r"P\C").unwrap().values(),
        values.values()
    );

    switch.refuse_syncs(false);
    store.store_subkeys("P", &desired).unwrap();
    assert_eq!(store.fetch_subkeys("P").unwrap().names(), ["K", "N"]);
    assert!(!store.key_exists(r"P\C").unwrap());
    assert!(store.fetch_values(r"P\C").unwrap().is_empty());
    assert!(store.key_exists(r"P\N").unwrap());
}

#[test]
fn failed_first_open_leaves_database_uninitialized() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("registry.db");

    let backend = CrashingBackend::new(Box::new(FileBackend::open(&path).unwrap()));
    backend.switch().refuse_syncs(true);
    let config = Config::default();
    let engine = StorageEngine::with_backend(Box::new(backend), config.engine_options()).unwrap();
    assert!(RegistryStore::with_engine(engine, config).is_err());

    assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    let raw = StorageEngine::open(&path, EngineOptions::default()).unwrap();
    assert!(raw.is_empty().unwrap());
    assert_eq!(raw.current_seqnum(), SequenceNumber::new(0));
    drop(raw);

    let store = RegistryStore::open(&path, Config::default()).unwrap();
    assert_eq!(store.format_version().unwrap(), Some(regdb_core::REGVER_V1));
    assert!(store.key_exists(r"HKLM\SOFTWARE\Samba\smbconf").unwrap());
}
