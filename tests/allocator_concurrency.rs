//! # Page Allocator Concurrency Tests
//!
//! Exercises `Device` from many threads at once:
//! 1. Concurrent requests never hand out the same page twice
//! 2. Exhaustion is reported exactly when every page is taken
//! 3. Pages cycled through request/reclaim by several threads stay unique

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use nvmstore::device::{Device, Geometry, PageAddr};
use nvmstore::error::nvm_error;
use nvmstore::NvmError;

fn is_exhausted(err: &eyre::Report) -> bool {
    matches!(nvm_error(err), Some(NvmError::Exhausted { .. }))
}

mod allocation {
    use super::*;

    #[test]
    fn concurrent_requests_return_distinct_pages() {
        let dev = Arc::new(Device::emulated("emu0", Geometry::new(4, 8, 16)).unwrap());
        let threads = 8;
        let per_thread = 64;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let dev = Arc::clone(&dev);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    (0..per_thread)
                        .map(|_| dev.request_page().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for addr in handle.join().unwrap() {
                assert!(seen.insert(addr), "page {} handed out twice", addr);
            }
        }

        assert_eq!(seen.len(), threads * per_thread);
        assert_eq!(dev.allocated_pages(), (threads * per_thread) as u64);
    }

    #[test]
    fn racing_threads_drain_device_exactly() {
        let geometry = Geometry::new(2, 4, 8);
        let total = geometry.total_pages() as usize;
        let dev = Arc::new(Device::emulated("emu0", geometry).unwrap());
        let threads = 6;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let dev = Arc::clone(&dev);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let mut got = Vec::new();
                    loop {
                        match dev.request_page() {
                            Ok(addr) => got.push(addr),
                            Err(e) => {
                                assert!(is_exhausted(&e), "unexpected error: {:?}", e);
                                return got;
                            }
                        }
                    }
                })
            })
            .collect();

        let all: Vec<PageAddr> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let distinct: HashSet<_> = all.iter().copied().collect();

        assert_eq!(all.len(), total);
        assert_eq!(distinct.len(), total);
        assert!(is_exhausted(&dev.request_page().unwrap_err()));
    }

    #[test]
    fn small_device_scenario() {
        let dev = Device::emulated("emu0", Geometry::new(2, 2, 4)).unwrap();

        let pages: Vec<_> = (0..16).map(|_| dev.request_page().unwrap()).collect();
        let distinct: HashSet<_> = pages.iter().collect();
        assert_eq!(distinct.len(), 16);

        let err = dev.request_page().unwrap_err();
        assert!(is_exhausted(&err));
        assert!(err.to_string().contains("16 pages"));

        dev.reclaim_page(pages[0]).unwrap();
        assert_eq!(dev.request_page().unwrap(), pages[0]);
    }
}

mod reclamation {
    use super::*;

    #[test]
    fn request_reclaim_cycles_keep_live_pages_unique() {
        let dev = Arc::new(Device::emulated("emu0", Geometry::new(2, 2, 8)).unwrap());
        let threads = 4;
        let rounds = 500;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let dev = Arc::clone(&dev);
                thread::spawn(move || {
                    let mut live = Vec::new();
                    for round in 0..rounds {
                        match dev.request_page() {
                            Ok(addr) => live.push(addr),
                            Err(e) => assert!(is_exhausted(&e)),
                        }
                        if round % 3 == 2 {
                            if let Some(addr) = live.pop() {
                                dev.reclaim_page(addr).unwrap();
                            }
                        }
                    }
                    live
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for addr in handle.join().unwrap() {
                assert!(seen.insert(addr), "page {} live in two owners", addr);
            }
        }
        assert_eq!(dev.allocated_pages(), seen.len() as u64);
    }

    #[test]
    fn erase_cycle_returns_block_to_clean_state() {
        let dev = Device::emulated("emu0", Geometry::new(1, 2, 4)).unwrap();

        let block0: Vec<_> = (0..4).map(|_| dev.request_page().unwrap()).collect();
        for addr in &block0 {
            dev.reclaim_page(*addr).unwrap();
        }
        assert!(dev.block_has_stale_pages(0, 0));
        assert_eq!(dev.stale_pages(), block0);

        dev.complete_erase(0, 0).unwrap();

        assert!(!dev.block_has_stale_pages(0, 0));
        assert!(dev.stale_pages().is_empty());
        assert!(block0.iter().all(|a| dev.page(*a).unwrap().erased));
    }
}
