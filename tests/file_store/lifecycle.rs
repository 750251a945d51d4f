//! Open, commit, merge and invalidate against a file across restarts.

use crate::common::{commit_each, config, create_cow, reopen};
use snapstore::format::{DiskHeader, SNAP_MAGIC};
use snapstore::{PersistentStore, StoreError};
use tempfile::TempDir;

#[test]
fn test_new_file_store_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cow.img");

    let committed = {
        let (mut store, outcome) =
            PersistentStore::open(create_cow(&path, 64), config(), &mut |_| Ok(())).unwrap();
        assert!(outcome.new_store);
        commit_each(&mut store, &[5, 6, 7, 8, 9, 40])
    };

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..4], &SNAP_MAGIC.to_le_bytes());
    let header = DiskHeader::decode(&bytes[..512]).unwrap().unwrap();
    assert!(header.valid);
    assert_eq!(header.chunk_size, 8);

    let (store, outcome, replayed) = reopen(&path);
    assert!(!outcome.new_store);
    assert_eq!(replayed, committed);
    assert_eq!(outcome.areas_scanned, 2);
    assert!(store.is_valid());
}

#[test]
fn test_merge_then_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cow.img");

    {
        let (mut store, _) =
            PersistentStore::open(create_cow(&path, 64), config(), &mut |_| Ok(())).unwrap();
        commit_each(&mut store, &[10, 11, 12, 13, 14, 15]);
        while let Some(run) = store.prepare_merge().unwrap() {
            store.commit_merge(run.count).unwrap();
        }
    }

    let (mut store, _, replayed) = reopen(&path);
    assert!(replayed.is_empty());
    assert_eq!(store.prepare_exception(99).unwrap(), 2);
}

#[test]
fn test_invalidated_file_store_stays_invalid() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cow.img");

    {
        let (mut store, _) =
            PersistentStore::open(create_cow(&path, 16), config(), &mut |_| Ok(())).unwrap();
        commit_each(&mut store, &[1, 2]);
        store.drop_store();
    }

    let (mut store, outcome, replayed) = reopen(&path);
    assert!(!outcome.valid);
    assert!(replayed.is_empty());
    assert!(matches!(
        store.prepare_exception(3),
        Err(StoreError::StoreInvalid)
    ));
}
