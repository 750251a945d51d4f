//! Power loss against a file: a copy of the file taken at the moment of the
//! cut is what the next boot sees.

use crate::common::{config, reopen};
use snapstore::testing::{Fault, FaultyDevice};
use snapstore::{Exception, FileDevice, PersistentStore};
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_power_cut_mid_workload_recovers_acknowledged() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cow.img");

    let dev = Arc::new(FaultyDevice::new(FileDevice::create(&path, 64 * 8).unwrap()));
    let (mut store, _) = PersistentStore::open(dev.clone(), config(), &mut |_| Ok(())).unwrap();

    // Cut power after the 7th metadata write from here on.
    dev.inject(Fault::PowerCutAfter(7));

    let mut acknowledged = Vec::new();
    for old in 0..20u64 {
        let chunk = match store.prepare_exception(old) {
            Ok(chunk) => chunk,
            Err(_) => break,
        };
        let exception = Exception::new(old, chunk);
        if store.commit_exception(exception).wait().is_ok() {
            acknowledged.push(exception);
        }
    }
    assert!(dev.is_powered_off());
    assert!(!store.is_valid());
    drop(store);
    drop(dev);

    let (_, outcome, replayed) = reopen(&path);
    assert!(outcome.valid);
    assert!(replayed.starts_with(&acknowledged));
    // At most the batch in flight at the cut can show up unacknowledged.
    assert!(replayed.len() <= acknowledged.len() + 1);
}
