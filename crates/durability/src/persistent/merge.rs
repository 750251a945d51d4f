//! Merging exceptions back into the origin.
//!
//! Merges consume the log from its tail. [`prepare_merge`] reports the longest
//! run of trailing exceptions whose old and new chunks are both consecutive,
//! so the caller can copy them with one I/O. [`commit_merge`] then erases that
//! run on disk and returns its chunks to the allocator.
//!
//! [`prepare_merge`]: PersistentStore::prepare_merge
//! [`commit_merge`]: PersistentStore::commit_merge

use super::PersistentStore;
use snapstore_core::{MergeRun, Result, StoreError};
use snapstore_storage::Direction;
use tracing::debug;

impl PersistentStore {
    /// Describe the next run of exceptions to merge, or `None` when the log
    /// is empty.
    ///
    /// If the current area has no committed records the previous (full) area
    /// is read back from disk and becomes current.
    pub fn prepare_merge(&mut self) -> Result<Option<MergeRun>> {
        self.ensure_loaded("prepare_merge")?;
        if !self.valid {
            return Err(StoreError::StoreInvalid);
        }

        if self.current_committed == 0 {
            if self.current_area == 0 {
                return Ok(None);
            }

            self.current_area -= 1;
            if let Err(e) = self.area_io(Direction::Read) {
                self.current_area += 1;
                self.area.fill(0);
                return Err(e.into());
            }
            self.current_committed = self.layout.exceptions_per_area();
            debug!(
                target: "snapstore::log",
                current_area = self.current_area,
                "Stepped back to previous metadata area for merge"
            );
        }

        let last_slot = self.current_committed - 1;
        let last = self.layout.get_exception(&self.area, last_slot);

        let mut count = 1u32;
        while count < self.current_committed {
            let e = self.layout.get_exception(&self.area, last_slot - count);
            let step = u64::from(count);
            if last.old_chunk.checked_sub(step) != Some(e.old_chunk)
                || last.new_chunk.checked_sub(step) != Some(e.new_chunk)
            {
                break;
            }
            count += 1;
        }

        self.publish();
        Ok(Some(MergeRun {
            last_old_chunk: last.old_chunk,
            last_new_chunk: last.new_chunk,
            count,
        }))
    }

    /// Erase the last `count` committed exceptions after they were merged.
    ///
    /// A failed area write invalidates the store and is returned.
    pub fn commit_merge(&mut self, count: u32) -> Result<()> {
        self.ensure_loaded("commit_merge")?;
        if !self.valid {
            return Err(StoreError::StoreInvalid);
        }
        if count > self.current_committed {
            return Err(StoreError::invalid_operation(format!(
                "cannot merge {} exceptions, only {} committed in the current area",
                count, self.current_committed
            )));
        }
        if count == 0 {
            return Ok(());
        }

        for i in 0..count {
            self.layout
                .clear_exception(&mut self.area, self.current_committed - 1 - i);
        }

        let flags = self.metadata_write_flags();
        if let Err(e) = self.area_io(Direction::Write(flags)) {
            self.invalidate("metadata area write during merge failed", &e);
            return Err(e.into());
        }

        self.current_committed -= count;
        self.next_free =
            self.layout.area_location(self.current_area) + u64::from(self.current_committed) + 1;
        self.publish();

        debug!(
            target: "snapstore::log",
            count,
            current_area = self.current_area,
            next_free = self.next_free,
            "Merged exceptions released"
        );
        Ok(())
    }
}
