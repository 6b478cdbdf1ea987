//! # Page Allocator
//!
//! `Device` owns the page bookkeeping of one Open-Channel device and hands
//! out physical pages under concurrent access.
//!
//! ## Allocation
//!
//! A single cursor names the next address to probe. `request_page()` takes
//! the allocation mutex, walks forward from the cursor in page → block → LUN
//! order (wrapping at the end of the device) and takes the first page that
//! is not allocated. The cursor is left on the address after the returned
//! page, so successive requests sweep the whole device round-robin and load
//! spreads across LUNs and blocks over time.
//!
//! The walk is bounded by `max_alloc_try_count` probes. The bound defaults to
//! (and is clamped at) the total page count, so a request only fails with
//! `NvmError::Exhausted` when every page is allocated.
//!
//! ## Reclamation
//!
//! `reclaim_page()` returns a page to the allocatable pool and marks its block
//! as holding stale pages. The page is also linked into the stale list, which
//! the out-of-band erase step reads to pick candidates. After erasing a block
//! it calls `complete_erase()`, which clears the stale state. Reclaiming an
//! unallocated page is a no-op.
//!
//! ```text
//! unallocated ──request──> allocated ──reclaim──> unallocated + stale
//!      ▲                                                │
//!      └───────────────── complete_erase ───────────────┘  (erased = true)
//! ```
//!
//! ## Thread Safety
//!
//! `Device` is `Send + Sync`. The cursor, page flags and stale list sit
//! behind one `parking_lot::Mutex`; every public operation is a single
//! critical section with O(probe bound) work and no I/O. The geometry and
//! location are immutable after construction and read without locking.

use eyre::{bail, ensure, Result};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::control::{CharDevice, DeviceControl, EmulatedDevice};
use super::free_list::FreeList;
use super::geometry::{Geometry, Lun, Page, PageAddr, PageSizes};
use crate::config::DeviceOptions;
use crate::error::{nvm_error, NvmError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub addr: PageAddr,
    pub allocated: bool,
    pub erased: bool,
    pub sizes: PageSizes,
}

impl From<&Page> for PageInfo {
    fn from(page: &Page) -> Self {
        Self {
            addr: page.addr,
            allocated: page.allocated,
            erased: page.erased,
            sizes: page.sizes.clone(),
        }
    }
}

struct AllocState {
    luns: Vec<Lun>,
    cursor: PageAddr,
    allocated: u64,
    stale: FreeList,
}

impl AllocState {
    fn page(&self, addr: PageAddr) -> &Page {
        &self.luns[addr.lun as usize].blocks[addr.block as usize].pages[addr.page as usize]
    }

    fn page_mut(&mut self, addr: PageAddr) -> &mut Page {
        &mut self.luns[addr.lun as usize].blocks[addr.block as usize].pages[addr.page as usize]
    }
}

pub struct Device {
    location: String,
    geometry: Geometry,
    max_alloc_try_count: u64,
    state: Mutex<AllocState>,
    _control: Box<dyn DeviceControl>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("location", &self.location)
            .field("geometry", &self.geometry)
            .field("max_alloc_try_count", &self.max_alloc_try_count)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Opens the character device at `options.location` and queries its geometry.
    pub fn open(options: &DeviceOptions) -> Result<Self> {
        let control = CharDevice::open(&options.location)?;
        Self::with_control(Box::new(control), options)
    }

    /// Builds a device with a fixed geometry and no backing hardware.
    pub fn emulated(location: impl Into<String>, geometry: Geometry) -> Result<Self> {
        let control = EmulatedDevice::new(location, geometry);
        let options = DeviceOptions::new(control.location());
        Self::with_control(Box::new(control), &options)
    }

    pub fn with_control(control: Box<dyn DeviceControl>, options: &DeviceOptions) -> Result<Self> {
        let location = control.location().to_string();
        let geometry = match control.describe_geometry() {
            Ok(geometry) => geometry,
            Err(e) if matches!(nvm_error(&e), Some(NvmError::DeviceInit { .. })) => {
                return Err(e)
            }
            Err(e) => bail!(NvmError::DeviceInit {
                location,
                reason: format!("geometry query failed: {:#}", e),
            }),
        };
        if let Err(e) = geometry.validate() {
            bail!(NvmError::DeviceInit {
                location,
                reason: format!("invalid geometry: {}", e),
            });
        }

        let total = geometry.total_pages();
        if total >= u32::MAX as u64 {
            bail!(NvmError::DeviceInit {
                location,
                reason: format!("{} pages exceed the addressable page count", total),
            });
        }

        let max_alloc_try_count = match options.max_alloc_try_count {
            Some(0) => bail!(NvmError::DeviceInit {
                location,
                reason: "max_alloc_try_count must be at least 1".to_string(),
            }),
            Some(count) => count.min(total),
            None => total,
        };

        info!(
            location = %location,
            luns = geometry.luns,
            blocks_per_lun = geometry.blocks_per_lun,
            pages_per_block = geometry.pages_per_block,
            channels_per_lun = geometry.channels_per_lun,
            total_pages = total,
            "nvm device initialized"
        );

        let state = AllocState {
            luns: geometry.build_luns(),
            cursor: PageAddr::new(0, 0, 0),
            allocated: 0,
            stale: FreeList::with_capacity(total as usize),
        };

        Ok(Self {
            location,
            geometry,
            max_alloc_try_count,
            state: Mutex::new(state),
            _control: control,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn max_alloc_try_count(&self) -> u64 {
        self.max_alloc_try_count
    }

    pub fn request_page(&self) -> Result<PageAddr> {
        let mut state = self.state.lock();
        let mut addr = state.cursor;

        for _ in 0..self.max_alloc_try_count {
            let next = self.geometry.next_addr(addr);

            if !state.page(addr).allocated {
                let page = state.page_mut(addr);
                page.allocated = true;
                page.erased = false;

                let index = self.geometry.flat_index(addr) as u32;
                state.stale.remove(index);
                state.allocated += 1;
                state.cursor = next;

                trace!(page = %addr, "page allocated");
                return Ok(addr);
            }

            addr = next;
        }

        warn!(
            location = %self.location,
            probed = self.max_alloc_try_count,
            allocated = state.allocated,
            "no allocatable page"
        );
        bail!(NvmError::Exhausted {
            probed: self.max_alloc_try_count,
        })
    }

    pub fn reclaim_page(&self, addr: PageAddr) -> Result<()> {
        ensure!(
            self.geometry.contains(addr),
            "page {} is outside device geometry ({} luns x {} blocks x {} pages)",
            addr,
            self.geometry.luns,
            self.geometry.blocks_per_lun,
            self.geometry.pages_per_block
        );

        let mut state = self.state.lock();

        if !state.page(addr).allocated {
            return Ok(());
        }

        state.page_mut(addr).allocated = false;
        state.luns[addr.lun as usize].blocks[addr.block as usize].has_stale_pages = true;
        state.stale.push_back(self.geometry.flat_index(addr) as u32);
        state.allocated -= 1;

        trace!(page = %addr, "page reclaimed");
        Ok(())
    }

    /// Records that `lun:block` was physically erased by the caller.
    pub fn complete_erase(&self, lun: u32, block: u32) -> Result<()> {
        ensure!(
            self.geometry.contains(PageAddr::new(lun, block, 0)),
            "block {}:{} is outside device geometry",
            lun,
            block
        );

        let mut state = self.state.lock();
        let state = &mut *state;

        let target = &mut state.luns[lun as usize].blocks[block as usize];
        let live = target.pages.iter().filter(|p| p.allocated).count();
        ensure!(
            live == 0,
            "cannot erase block {}:{} with {} allocated pages",
            lun,
            block,
            live
        );

        for page in target.pages.iter_mut() {
            page.erased = true;
            state.stale.remove(self.geometry.flat_index(page.addr) as u32);
        }
        target.has_stale_pages = false;

        debug!(lun, block, "block erase recorded");
        Ok(())
    }

    pub fn page(&self, addr: PageAddr) -> Option<PageInfo> {
        if !self.geometry.contains(addr) {
            return None;
        }
        let state = self.state.lock();
        Some(PageInfo::from(state.page(addr)))
    }

    pub fn block_has_stale_pages(&self, lun: u32, block: u32) -> bool {
        if !self.geometry.contains(PageAddr::new(lun, block, 0)) {
            return false;
        }
        let state = self.state.lock();
        state.luns[lun as usize].blocks[block as usize].has_stale_pages
    }

    pub fn allocated_pages(&self) -> u64 {
        self.state.lock().allocated
    }

    pub fn free_pages(&self) -> u64 {
        self.geometry.total_pages() - self.allocated_pages()
    }

    /// Reclaimed pages not yet erased, oldest first.
    pub fn stale_pages(&self) -> Vec<PageAddr> {
        let state = self.state.lock();
        state
            .stale
            .iter()
            .map(|index| self.geometry.addr_of(index as u64))
            .collect()
    }
}
