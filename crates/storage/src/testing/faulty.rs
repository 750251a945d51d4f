//! Fault-injecting block device wrapper.
//!
//! Wraps any [`BlockDevice`] and fails selected requests the way a dying disk
//! or a power cut would. Every write that reaches the wrapper is recorded so
//! tests can assert on ordering, batching and durability flags.

use crate::device::{BlockDevice, WriteFlags};
use parking_lot::Mutex;
use snapstore_core::Sector;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A failure to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail the Nth write seen by the device (1-based), once
    FailNthWrite(u64),
    /// Fail every write that starts at this sector
    FailWritesAt(Sector),
    /// Fail every read that starts at this sector
    FailReadsAt(Sector),
    /// After N more writes succeed, drop every later request as if power was lost
    PowerCutAfter(u64),
}

/// One write observed by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    /// First sector written
    pub sector: Sector,
    /// Length in bytes
    pub len: usize,
    /// Durability flags
    pub flags: WriteFlags,
    /// Whether the write reached the inner device
    pub applied: bool,
}

/// A [`BlockDevice`] that fails requests according to injected [`Fault`]s.
pub struct FaultyDevice<D> {
    inner: D,
    faults: Mutex<Vec<Fault>>,
    writes_seen: AtomicU64,
    power_cut_at: Mutex<Option<u64>>,
    powered_off: AtomicBool,
    log: Mutex<Vec<WriteRecord>>,
}

impl<D: BlockDevice> FaultyDevice<D> {
    /// Wrap `inner` with no faults armed.
    pub fn new(inner: D) -> Self {
        FaultyDevice {
            inner,
            faults: Mutex::new(Vec::new()),
            writes_seen: AtomicU64::new(0),
            power_cut_at: Mutex::new(None),
            powered_off: AtomicBool::new(false),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Arm a fault.
    pub fn inject(&self, fault: Fault) {
        if let Fault::PowerCutAfter(n) = fault {
            let seen = self.writes_seen.load(Ordering::SeqCst);
            *self.power_cut_at.lock() = Some(seen + n);
            return;
        }
        self.faults.lock().push(fault);
    }

    /// Fail every write to `chunk` for a device using `chunk_size`-sector chunks.
    pub fn fail_writes_to_chunk(&self, chunk: u64, chunk_size: u32) {
        self.inject(Fault::FailWritesAt(chunk * u64::from(chunk_size)));
    }

    /// Fail every read of `chunk` for a device using `chunk_size`-sector chunks.
    pub fn fail_reads_of_chunk(&self, chunk: u64, chunk_size: u32) {
        self.inject(Fault::FailReadsAt(chunk * u64::from(chunk_size)));
    }

    /// Disarm all faults and restore power.
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
        *self.power_cut_at.lock() = None;
        self.powered_off.store(false, Ordering::SeqCst);
    }

    /// Number of writes seen so far, failed ones included.
    pub fn writes_seen(&self) -> u64 {
        self.writes_seen.load(Ordering::SeqCst)
    }

    /// Every write observed, in order.
    pub fn write_log(&self) -> Vec<WriteRecord> {
        self.log.lock().clone()
    }

    /// Forget the recorded writes.
    pub fn clear_write_log(&self) {
        self.log.lock().clear();
    }

    /// True once an armed power cut has triggered.
    pub fn is_powered_off(&self) -> bool {
        self.powered_off.load(Ordering::SeqCst)
    }

    /// The wrapped device.
    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn injected_error(what: &str, sector: Sector) -> io::Error {
        io::Error::new(
            io::ErrorKind::Other,
            format!("injected {} failure at sector {}", what, sector),
        )
    }
}

impl<D: BlockDevice> BlockDevice for FaultyDevice<D> {
    fn read_sectors(&self, sector: Sector, buf: &mut [u8]) -> io::Result<()> {
        if self.is_powered_off() {
            return Err(Self::injected_error("read (power lost)", sector));
        }
        if self
            .faults
            .lock()
            .iter()
            .any(|f| *f == Fault::FailReadsAt(sector))
        {
            return Err(Self::injected_error("read", sector));
        }
        self.inner.read_sectors(sector, buf)
    }

    fn write_sectors(&self, sector: Sector, buf: &[u8], flags: WriteFlags) -> io::Result<()> {
        let nth = self.writes_seen.fetch_add(1, Ordering::SeqCst) + 1;

        let mut fail = self.is_powered_off();
        if let Some(cut) = *self.power_cut_at.lock() {
            if nth > cut {
                self.powered_off.store(true, Ordering::SeqCst);
                fail = true;
            }
        }

        {
            let mut faults = self.faults.lock();
            if let Some(pos) = faults.iter().position(|f| *f == Fault::FailNthWrite(nth)) {
                faults.remove(pos);
                fail = true;
            }
            if faults.iter().any(|f| *f == Fault::FailWritesAt(sector)) {
                fail = true;
            }
        }

        self.log.lock().push(WriteRecord {
            sector,
            len: buf.len(),
            flags,
            applied: !fail,
        });

        if fail {
            return Err(Self::injected_error("write", sector));
        }
        self.inner.write_sectors(sector, buf, flags)
    }

    fn flush(&self) -> io::Result<()> {
        if self.is_powered_off() {
            return Err(Self::injected_error("flush (power lost)", 0));
        }
        self.inner.flush()
    }

    fn size_sectors(&self) -> io::Result<u64> {
        self.inner.size_sectors()
    }

    fn logical_block_size(&self) -> u32 {
        self.inner.logical_block_size()
    }
}
