//! Integration tests for the block layer
//!
//! Tests cover:
//! - MemoryDevice and FileDevice agree under random sector I/O
//! - ChunkIo routes land on the same bytes regardless of route
//! - Metadata writes from several threads are serialized by the worker
//! - FaultyDevice power cuts and write logging

use rand::prelude::*;
use snapstore_core::SECTOR_SIZE;
use snapstore_storage::testing::{Fault, FaultyDevice};
use snapstore_storage::{
    BlockDevice, ChunkIo, Direction, FileDevice, IoRoute, MemoryDevice, WriteFlags,
};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

const SECTORS: u64 = 256;

// ============================================================================
// Device equivalence
// ============================================================================

mod device_equivalence {
    use super::*;

    #[test]
    fn test_memory_and_file_agree_after_random_ops() {
        let dir = TempDir::new().unwrap();
        let file = FileDevice::create(dir.path().join("dev.img"), SECTORS).unwrap();
        let memory = MemoryDevice::new(SECTORS);
        let mut rng = StdRng::seed_from_u64(0xB10C);

        for _ in 0..500 {
            let len_sectors = rng.gen_range(1..=8u64);
            let sector = rng.gen_range(0..=SECTORS - len_sectors);
            let mut buf = vec![0u8; len_sectors as usize * SECTOR_SIZE];

            if rng.gen_bool(0.6) {
                rng.fill(&mut buf[..]);
                let flags = if rng.gen_bool(0.2) {
                    WriteFlags::FLUSH_FUA
                } else {
                    WriteFlags::NONE
                };
                file.write_sectors(sector, &buf, flags).unwrap();
                memory.write_sectors(sector, &buf, flags).unwrap();
            } else {
                let mut other = buf.clone();
                file.read_sectors(sector, &mut buf).unwrap();
                memory.read_sectors(sector, &mut other).unwrap();
                assert_eq!(buf, other, "divergence at sector {}", sector);
            }
        }

        file.flush().unwrap();
        assert_eq!(std::fs::read(file.path()).unwrap(), memory.image());
    }

    #[test]
    fn test_out_of_range_io_rejected_by_both() {
        let dir = TempDir::new().unwrap();
        let file = FileDevice::create(dir.path().join("dev.img"), 8).unwrap();
        let memory = MemoryDevice::new(8);
        let mut buf = vec![0u8; 2 * SECTOR_SIZE];

        assert!(file.read_sectors(7, &mut buf).is_err());
        assert!(memory.read_sectors(7, &mut buf).is_err());
        assert!(file.write_sectors(7, &buf, WriteFlags::NONE).is_err());
        assert!(memory.write_sectors(7, &buf, WriteFlags::NONE).is_err());
        assert_eq!(file.size_sectors().unwrap(), 8);
    }
}

// ============================================================================
// Chunk I/O
// ============================================================================

mod chunk_io {
    use super::*;

    #[test]
    fn test_routes_see_the_same_bytes() {
        let dev: Arc<dyn BlockDevice> = Arc::new(MemoryDevice::new(SECTORS));
        let io = ChunkIo::new(dev, 8).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        for chunk in 0..(SECTORS / 8) {
            let mut buf = vec![0u8; io.chunk_bytes()];
            rng.fill(&mut buf[..]);
            let expected = buf.clone();

            let (write_route, read_route) = if chunk % 2 == 0 {
                (IoRoute::Metadata, IoRoute::Direct)
            } else {
                (IoRoute::Direct, IoRoute::Metadata)
            };
            io.chunk_io(&mut buf, chunk, Direction::Write(WriteFlags::FUA), write_route)
                .unwrap();

            let mut out = vec![0u8; io.chunk_bytes()];
            io.chunk_io(&mut out, chunk, Direction::Read, read_route)
                .unwrap();
            assert_eq!(out, expected);
        }

        let counters = io.counters();
        assert_eq!(counters.writes, SECTORS / 8);
        assert_eq!(counters.durable_writes, SECTORS / 8);
        assert_eq!(counters.errors, 0);
    }

    #[test]
    fn test_concurrent_metadata_writes_all_land() {
        let dev = Arc::new(FaultyDevice::new(MemoryDevice::new(SECTORS)));
        let io = Arc::new(ChunkIo::new(dev.clone(), 8).unwrap());

        let writers: Vec<_> = (0..4u8)
            .map(|t| {
                let io = Arc::clone(&io);
                thread::spawn(move || {
                    for i in 0..8u64 {
                        let chunk = u64::from(t) * 8 + i;
                        let mut buf = vec![t + 1; io.chunk_bytes()];
                        io.chunk_io(
                            &mut buf,
                            chunk,
                            Direction::Write(WriteFlags::FLUSH_FUA),
                            IoRoute::Metadata,
                        )
                        .unwrap();
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        assert_eq!(dev.write_log().len(), 32);
        assert_eq!(io.counters().metadata_requests, 32);
        let image = dev.inner().image();
        for t in 0..4u8 {
            let start = usize::from(t) * 8 * 8 * SECTOR_SIZE;
            let end = start + 8 * 8 * SECTOR_SIZE;
            assert!(image[start..end].iter().all(|&b| b == t + 1));
        }
    }

    #[test]
    fn test_failed_metadata_write_keeps_buffer_size() {
        let dev = Arc::new(FaultyDevice::new(MemoryDevice::new(SECTORS)));
        dev.fail_writes_to_chunk(3, 8);
        let io = ChunkIo::new(dev.clone(), 8).unwrap();

        let mut buf = vec![9u8; io.chunk_bytes()];
        assert!(io
            .chunk_io(&mut buf, 3, Direction::Write(WriteFlags::FUA), IoRoute::Metadata)
            .is_err());
        assert_eq!(buf.len(), io.chunk_bytes());
        assert_eq!(io.counters().errors, 1);
    }
}

// ============================================================================
// Fault injection
// ============================================================================

mod fault_injection {
    use super::*;

    #[test]
    fn test_power_cut_drops_later_writes() {
        let dev = FaultyDevice::new(MemoryDevice::new(16));
        dev.inject(Fault::PowerCutAfter(2));

        let block = vec![1u8; SECTOR_SIZE];
        dev.write_sectors(0, &block, WriteFlags::NONE).unwrap();
        dev.write_sectors(1, &block, WriteFlags::NONE).unwrap();
        assert!(dev.write_sectors(2, &block, WriteFlags::NONE).is_err());
        assert!(dev.is_powered_off());

        let mut out = vec![0u8; SECTOR_SIZE];
        assert!(dev.read_sectors(0, &mut out).is_err());

        let applied: Vec<bool> = dev.write_log().iter().map(|w| w.applied).collect();
        assert_eq!(applied, vec![true, true, false]);

        let image = dev.inner().image();
        assert!(image[..2 * SECTOR_SIZE].iter().all(|&b| b == 1));
        assert!(image[2 * SECTOR_SIZE..].iter().all(|&b| b == 0));

        dev.clear_faults();
        dev.read_sectors(0, &mut out).unwrap();
        assert_eq!(out, block);
    }

    #[test]
    fn test_fail_nth_write_is_one_shot() {
        let dev = FaultyDevice::new(MemoryDevice::new(16));
        dev.inject(Fault::FailNthWrite(2));
        let block = vec![0u8; SECTOR_SIZE];

        assert!(dev.write_sectors(0, &block, WriteFlags::NONE).is_ok());
        assert!(dev.write_sectors(0, &block, WriteFlags::NONE).is_err());
        assert!(dev.write_sectors(0, &block, WriteFlags::NONE).is_ok());
        assert_eq!(dev.writes_seen(), 3);
    }
}
