//! The exception store interface consumed by the snapshot layer.
//!
//! A store hands out COW chunks for origin chunks about to be overwritten,
//! records the resulting exceptions durably, replays them on open and gives
//! chunks back as exceptions are merged into the origin.
//!
//! Commit completion is reported through a [`CommitHandle`]: the store
//! resolves it once the batch the exception belongs to is on stable storage
//! (or has failed). Every committed exception is resolved exactly once.

use crate::usage::UsageReporter;
use parking_lot::{Condvar, Mutex};
use snapstore_core::{ChunkIndex, Exception, MergeRun, Result, StoreError, Usage};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Callback invoked once per exception found during recovery.
///
/// Returning an error aborts the scan; the error is passed through.
pub type ReplayCallback<'a> = dyn FnMut(Exception) -> Result<()> + 'a;

/// What [`ExceptionStore::read_metadata`] found on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryOutcome {
    /// The device held no store; a fresh one was written
    pub new_store: bool,
    /// Whether the store is usable. False when the header was found invalidated.
    pub valid: bool,
    /// Number of exceptions handed to the callback
    pub exceptions_replayed: u64,
    /// Number of metadata areas read during the scan
    pub areas_scanned: u64,
    /// `(configured, on_disk)` chunk sizes when the on-disk value won
    pub chunk_size_override: Option<(u32, u32)>,
}

struct CommitState {
    result: Mutex<Option<bool>>,
    done: Condvar,
}

impl CommitState {
    fn resolve(&self, ok: bool) {
        let mut result = self.result.lock();
        if result.is_none() {
            *result = Some(ok);
            self.done.notify_all();
        }
    }
}

/// Completion notification for one committed exception.
///
/// Handles are cheap to clone; all clones observe the same resolution.
#[derive(Clone)]
pub struct CommitHandle {
    state: Arc<CommitState>,
}

/// The store-side half of a [`CommitHandle`].
///
/// Dropping a completer without calling [`complete`](Self::complete) resolves
/// the handle as failed, so a waiter is never left hanging.
pub struct CommitCompleter {
    state: Arc<CommitState>,
}

impl CommitHandle {
    /// Create an unresolved handle and the completer that resolves it.
    pub fn pending() -> (CommitHandle, CommitCompleter) {
        let state = Arc::new(CommitState {
            result: Mutex::new(None),
            done: Condvar::new(),
        });
        (
            CommitHandle {
                state: Arc::clone(&state),
            },
            CommitCompleter { state },
        )
    }

    /// Create a handle that is already resolved.
    pub fn resolved(ok: bool) -> CommitHandle {
        let (handle, completer) = CommitHandle::pending();
        completer.complete(ok);
        handle
    }

    /// True once the commit has succeeded or failed.
    pub fn is_complete(&self) -> bool {
        self.state.result.lock().is_some()
    }

    /// Current outcome without blocking; `None` while still pending.
    pub fn status(&self) -> Option<Result<()>> {
        (*self.state.result.lock()).map(outcome)
    }

    /// Block until the commit is resolved.
    ///
    /// Returns `CommitFailed` if the exception did not reach stable storage.
    pub fn wait(&self) -> Result<()> {
        let mut result = self.state.result.lock();
        while result.is_none() {
            self.state.done.wait(&mut result);
        }
        outcome(result.unwrap_or(false))
    }

    /// Block for at most `timeout`; `None` if still pending afterwards.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        let deadline = Instant::now() + timeout;
        let mut result = self.state.result.lock();
        while result.is_none() {
            if self.state.done.wait_until(&mut result, deadline).timed_out() {
                break;
            }
        }
        (*result).map(outcome)
    }
}

impl std::fmt::Debug for CommitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitHandle")
            .field("result", &*self.state.result.lock())
            .finish()
    }
}

impl CommitCompleter {
    /// Resolve the handle.
    pub fn complete(self, ok: bool) {
        self.state.resolve(ok);
    }
}

impl Drop for CommitCompleter {
    fn drop(&mut self) {
        self.state.resolve(false);
    }
}

fn outcome(ok: bool) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(StoreError::CommitFailed)
    }
}

/// A snapshot exception store.
///
/// All mutating operations take `&mut self`: callers serialize access to a
/// store. Usage can be read concurrently through [`usage_reporter`].
///
/// [`usage_reporter`]: ExceptionStore::usage_reporter
pub trait ExceptionStore: Send {
    /// Registered name of the store type.
    fn type_name(&self) -> &'static str;

    /// Load the store from the device, replaying every recorded exception
    /// through `callback`.
    fn read_metadata(&mut self, callback: &mut ReplayCallback<'_>) -> Result<RecoveryOutcome>;

    /// Reserve a COW chunk for `old_chunk`.
    ///
    /// Fails with `NoSpace` when the device is full (the store stays valid)
    /// and with `StoreInvalid` once the store has been invalidated.
    fn prepare_exception(&mut self, old_chunk: ChunkIndex) -> Result<ChunkIndex>;

    /// Record a prepared exception. The handle resolves once the exception
    /// is durable or has failed.
    fn commit_exception(&mut self, exception: Exception) -> CommitHandle;

    /// Find the trailing run of committed exceptions that can be merged next.
    fn prepare_merge(&mut self) -> Result<Option<MergeRun>>;

    /// Forget the last `count` committed exceptions after merging them.
    fn commit_merge(&mut self, count: u32) -> Result<()>;

    /// Permanently invalidate the store. Idempotent; never fails.
    fn drop_store(&mut self);

    /// Current space accounting.
    fn usage(&self) -> Result<Usage>;

    /// A handle for reading usage from other threads.
    fn usage_reporter(&self) -> UsageReporter;

    /// Chunk size in sectors.
    fn chunk_size(&self) -> u32;

    /// False once the store has been invalidated.
    fn is_valid(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_handle_resolves_success() {
        let (handle, completer) = CommitHandle::pending();
        assert!(!handle.is_complete());
        assert!(handle.status().is_none());

        completer.complete(true);
        assert!(handle.is_complete());
        assert!(handle.wait().is_ok());
        assert!(matches!(handle.status(), Some(Ok(()))));
    }

    #[test]
    fn test_handle_resolves_failure() {
        let handle = CommitHandle::resolved(false);
        assert!(matches!(handle.wait(), Err(StoreError::CommitFailed)));
    }

    #[test]
    fn test_dropped_completer_fails_handle() {
        let (handle, completer) = CommitHandle::pending();
        drop(completer);
        assert!(matches!(handle.status(), Some(Err(StoreError::CommitFailed))));
    }

    #[test]
    fn test_first_resolution_wins() {
        let (handle, completer) = CommitHandle::pending();
        let state = Arc::clone(&completer.state);
        completer.complete(true);
        state.resolve(false);
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn test_wait_across_threads() {
        let (handle, completer) = CommitHandle::pending();
        let waiter = {
            let handle = handle.clone();
            thread::spawn(move || handle.wait())
        };
        thread::sleep(Duration::from_millis(10));
        completer.complete(true);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_wait_timeout_pending() {
        let (handle, _completer) = CommitHandle::pending();
        assert!(handle.wait_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_recovery_outcome_default() {
        let outcome = RecoveryOutcome::default();
        assert!(!outcome.new_store);
        assert_eq!(outcome.exceptions_replayed, 0);
        assert!(outcome.chunk_size_override.is_none());
    }
}
