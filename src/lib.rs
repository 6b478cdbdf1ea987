//! # nvmstore - Open-Channel Flash Storage Substrate
//!
//! nvmstore lets a database engine place its on-disk structures directly on
//! an Open-Channel flash device. It provides two independent building blocks:
//!
//! - **Page allocation**: a host-side model of the device geometry (LUNs,
//!   blocks, pages) that hands out and reclaims physical pages under
//!   concurrent access
//! - **File primitives**: sequential, random-access, growable-mmap and
//!   buffered-append files over plain descriptors, with sync bookkeeping and
//!   write rate limiting
//!
//! ## Quick Start
//!
//! ```ignore
//! use nvmstore::device::{Device, Geometry};
//! use nvmstore::io::{open_writable, Syncable, Writer};
//! use nvmstore::FileOptions;
//!
//! let dev = Device::emulated("emu0", Geometry::new(2, 2, 4))?;
//! let page = dev.request_page()?;
//!
//! let mut log = open_writable("./000001.log", &FileOptions::default())?;
//! log.append(b"record")?;
//! log.sync()?;
//! log.close()?;
//!
//! dev.reclaim_page(page)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     Filesystem layer (not in crate)      │
//! ├────────────────────┬────────────────────┤
//! │  device::Device    │  io::open_*        │
//! │  page allocator    │  readers, writers  │
//! ├────────────────────┼────────────────────┤
//! │  NVM_GET_GEOMETRY  │  pread/pwrite,     │
//! │  ioctl             │  mmap, fsync, ...  │
//! └────────────────────┴────────────────────┘
//! ```
//!
//! The writers never call into the allocator. Binding physical pages to
//! logical files is the filesystem layer's job.
//!
//! ## Module Overview
//!
//! - [`config`]: constants and `FileOptions`/`DeviceOptions`
//! - [`error`]: `NvmError`, the failures callers match on
//! - [`device`]: geometry, device control and the page allocator
//! - [`io`]: file traits, readers, writers, rate limiting
//!
//! ## Logging
//!
//! The crate emits `tracing` events (device init, allocation exhaustion,
//! region transitions, swallowed cache-invalidation failures) and never
//! installs a subscriber.

pub mod config;
pub mod device;
pub mod error;
pub mod io;

pub use config::{DeviceOptions, FileOptions};
pub use device::{Device, Geometry, PageAddr};
pub use error::NvmError;
