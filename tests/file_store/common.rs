//! Shared helpers for file-backed store tests.

use snapstore::{BlockDevice, Exception, FileDevice, PersistentStore, RecoveryOutcome, StoreConfig};
use std::path::Path;
use std::sync::Arc;

/// 4 KiB chunks, 4 records per area.
pub fn config() -> StoreConfig {
    StoreConfig::for_testing().with_area_capacity(4)
}

/// Create a zero-filled COW file of `chunks` 4 KiB chunks.
pub fn create_cow(path: &Path, chunks: u64) -> Arc<dyn BlockDevice> {
    Arc::new(FileDevice::create(path, chunks * 8).unwrap())
}

/// Open the store on `path`, collecting every replayed exception.
pub fn reopen(path: &Path) -> (PersistentStore, RecoveryOutcome, Vec<Exception>) {
    let device: Arc<dyn BlockDevice> = Arc::new(FileDevice::open(path).unwrap());
    let mut replayed = Vec::new();
    let (store, outcome) = PersistentStore::open(device, config(), &mut |e| {
        replayed.push(e);
        Ok(())
    })
    .unwrap();
    (store, outcome, replayed)
}

/// Prepare and commit each origin chunk in turn, waiting for durability.
pub fn commit_each(store: &mut PersistentStore, olds: &[u64]) -> Vec<Exception> {
    olds.iter()
        .map(|&old| {
            let e = Exception::new(old, store.prepare_exception(old).unwrap());
            store.commit_exception(e).wait().unwrap();
            e
        })
        .collect()
}
