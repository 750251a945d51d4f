//! Ordered execution context for metadata I/O.
//!
//! Header, area and zero-area writes are funneled through one dedicated
//! thread so that writes issued from different code paths land on the device
//! in submission order and never interleave. Callers block until their job
//! has run.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send>;

struct WorkerInner {
    queue: Mutex<VecDeque<Job>>,
    work_ready: Condvar,
    shutdown: AtomicBool,
    jobs_completed: AtomicU64,
}

/// Single-slot rendezvous between a submitter and the worker thread.
struct Completion<T> {
    slot: Mutex<Option<io::Result<T>>>,
    done: Condvar,
}

impl<T> Completion<T> {
    fn new() -> Self {
        Completion {
            slot: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn complete(&self, result: io::Result<T>) {
        let mut slot = self.slot.lock();
        *slot = Some(result);
        self.done.notify_all();
    }

    fn wait(&self) -> io::Result<T> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            self.done.wait(&mut slot);
        }
    }
}

/// A single worker thread executing jobs strictly in FIFO order.
pub struct MetadataWorker {
    inner: Arc<WorkerInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
    name: String,
}

impl MetadataWorker {
    /// Spawn the worker thread.
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let inner = Arc::new(WorkerInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            jobs_completed: AtomicU64::new(0),
        });

        let inner_clone = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&inner_clone))?;

        debug!(target: "snapstore::worker", name = %name, "Metadata worker started");

        Ok(MetadataWorker {
            inner,
            handle: Mutex::new(Some(handle)),
            name,
        })
    }

    /// Run `job` on the worker thread and wait for its result.
    ///
    /// Jobs submitted before this one complete first. A panicking job is
    /// reported as an I/O error; the worker keeps running.
    pub fn run<T, F>(&self, job: F) -> io::Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(stopped_error());
        }

        let completion = Arc::new(Completion::new());
        let waiter = Arc::clone(&completion);
        let envelope: Job = Box::new(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job))
                .map_err(|e| {
                    let msg = e
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| e.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "(non-string panic)".to_string());
                    error!(target: "snapstore::worker", panic = %msg, "Metadata job panicked");
                    io::Error::new(io::ErrorKind::Other, format!("metadata job panicked: {}", msg))
                });
            completion.complete(result);
        });

        {
            let mut queue = self.inner.queue.lock();
            // Re-check under the lock so a job can't slip in after the final drain.
            if self.inner.shutdown.load(Ordering::Acquire) {
                return Err(stopped_error());
            }
            queue.push_back(envelope);
        }
        self.inner.work_ready.notify_one();

        waiter.wait()
    }

    /// Number of jobs the worker has finished.
    pub fn jobs_completed(&self) -> u64 {
        self.inner.jobs_completed.load(Ordering::Relaxed)
    }

    /// Thread name of the worker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop accepting jobs, drain the queue and join the thread.
    ///
    /// Calling this more than once is harmless.
    pub fn shutdown(&self) {
        {
            let _queue = self.inner.queue.lock();
            self.inner.shutdown.store(true, Ordering::Release);
            self.inner.work_ready.notify_all();
        }

        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
            debug!(target: "snapstore::worker", name = %self.name, "Metadata worker stopped");
        }
    }
}

impl Drop for MetadataWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn stopped_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "metadata worker has stopped")
}

fn worker_loop(inner: &WorkerInner) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    break job;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        job();
        inner.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[test]
    fn test_run_returns_value() {
        let worker = MetadataWorker::spawn("test-meta").unwrap();
        let value = worker.run(|| 21 * 2).unwrap();
        assert_eq!(value, 42);
        assert_eq!(worker.jobs_completed(), 1);
    }

    #[test]
    fn test_runs_on_named_thread() {
        let worker = MetadataWorker::spawn("snap-meta-x").unwrap();
        let name = worker
            .run(|| std::thread::current().name().map(str::to_string))
            .unwrap();
        assert_eq!(name.as_deref(), Some("snap-meta-x"));
    }

    #[test]
    fn test_fifo_across_submitters() {
        let worker = Arc::new(MetadataWorker::spawn("test-meta").unwrap());
        let order = Arc::new(Mutex::new(Vec::new()));

        // Hold the worker so both submissions queue up behind the barrier job.
        let gate = Arc::new(Barrier::new(2));
        let blocker = {
            let worker = Arc::clone(&worker);
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || {
                worker.run(move || {
                    gate.wait();
                })
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(50));

        let first = {
            let worker = Arc::clone(&worker);
            let order = Arc::clone(&order);
            std::thread::spawn(move || worker.run(move || order.lock().push(1)))
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        let second = {
            let worker = Arc::clone(&worker);
            let order = Arc::clone(&order);
            std::thread::spawn(move || worker.run(move || order.lock().push(2)))
        };
        std::thread::sleep(std::time::Duration::from_millis(50));

        gate.wait();
        blocker.join().unwrap().unwrap();
        first.join().unwrap().unwrap();
        second.join().unwrap().unwrap();

        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn test_panicking_job_reports_error() {
        let worker = MetadataWorker::spawn("test-meta").unwrap();
        let err = worker
            .run(|| -> u32 { panic!("device exploded") })
            .unwrap_err();
        assert!(err.to_string().contains("device exploded"));

        // Worker survives the panic.
        assert_eq!(worker.run(|| 7).unwrap(), 7);
    }

    #[test]
    fn test_run_after_shutdown_fails() {
        let worker = MetadataWorker::spawn("test-meta").unwrap();
        worker.shutdown();
        worker.shutdown();
        let err = worker.run(|| ()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
