//! # Open-Channel Device
//!
//! Host-side bookkeeping for an Open-Channel SSD: the device exposes its
//! physical layout (LUNs, erase blocks, pages) and the host decides which
//! physical page every write lands on.
//!
//! ```text
//! Device
//!  ├── LUN 0
//!  │    ├── Block 0: [page 0][page 1] ... [page P-1]
//!  │    ├── Block 1: ...
//!  │    └── Block B-1
//!  ├── LUN 1
//!  └── LUN L-1
//! ```
//!
//! ## Modules
//!
//! - `geometry`: address and layout types, `RawGeometry` ioctl payload
//! - `control`: how a device is opened and how its geometry is learned
//! - `free_list`: arena-indexed list of stale pages awaiting erase
//! - `allocator`: `Device`, the thread-safe page allocator
//!
//! ## Usage
//!
//! ```ignore
//! use nvmstore::device::{Device, Geometry};
//!
//! let dev = Device::emulated("emu0", Geometry::new(2, 2, 4))?;
//! let addr = dev.request_page()?;
//! // ... write to addr through the device data path ...
//! dev.reclaim_page(addr)?;
//! ```
//!
//! The allocator does no I/O of its own. Page contents are written through
//! the device data path, outside this crate.

mod allocator;
mod control;
mod free_list;
mod geometry;

pub use allocator::{Device, PageInfo};
pub use control::{CharDevice, DeviceControl, EmulatedDevice, NVM_GET_GEOMETRY};
pub use free_list::FreeList;
pub use geometry::{
    Block, Channel, Geometry, Lun, Page, PageAddr, PageSizes, RawGeometry, RAW_MAX_PAGE_SIZES,
};
