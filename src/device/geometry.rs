//! # Device Geometry
//!
//! Physical layout of an Open-Channel device as reported by the driver:
//!
//! ```text
//! Device
//! ├── LUN 0
//! │   ├── channels: [Channel; channels_per_lun]
//! │   ├── Block 0: [Page 0, Page 1, ... Page pages_per_block-1]
//! │   ├── Block 1
//! │   └── ...
//! ├── LUN 1
//! └── ...
//! ```
//!
//! Every LUN has the same number of blocks and every block the same number of
//! pages, so a page address maps to a flat index in `0..total_pages()`:
//!
//! ```text
//! index = (lun * blocks_per_lun + block) * pages_per_block + page
//! ```
//!
//! The flat order is also the allocator's probe order: page, then block,
//! then LUN, wrapping back to LUN 0.
//!
//! `Geometry` is the compact description; `Lun`/`Block`/`Page` are the
//! per-page bookkeeping arrays the allocator builds from it.

use std::fmt;

use eyre::{ensure, Result};
use smallvec::SmallVec;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::INLINE_PAGE_SIZES;

pub type PageSizes = SmallVec<[u32; INLINE_PAGE_SIZES]>;

/// Maximum number of transfer sizes carried by the ioctl payload.
pub const RAW_MAX_PAGE_SIZES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Channel {
    pub gran_write: u32,
    pub gran_read: u32,
    pub gran_erase: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageAddr {
    pub lun: u32,
    pub block: u32,
    pub page: u32,
}

impl PageAddr {
    pub const fn new(lun: u32, block: u32, page: u32) -> Self {
        Self { lun, block, page }
    }
}

impl fmt::Display for PageAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.lun, self.block, self.page)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub addr: PageAddr,
    pub allocated: bool,
    pub erased: bool,
    pub sizes: PageSizes,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub pages: Vec<Page>,
    pub has_stale_pages: bool,
}

#[derive(Debug, Clone)]
pub struct Lun {
    pub blocks: Vec<Block>,
    pub pages_per_block: u32,
    pub channels: Vec<Channel>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub luns: u32,
    pub blocks_per_lun: u32,
    pub pages_per_block: u32,
    pub channels_per_lun: u32,
    pub channel: Channel,
    pub page_sizes: PageSizes,
}

impl Geometry {
    pub fn new(luns: u32, blocks_per_lun: u32, pages_per_block: u32) -> Self {
        Self {
            luns,
            blocks_per_lun,
            pages_per_block,
            channels_per_lun: 1,
            channel: Channel {
                gran_write: 4096,
                gran_read: 4096,
                gran_erase: 4096u32.saturating_mul(pages_per_block),
            },
            page_sizes: SmallVec::from_slice(&[4096]),
        }
    }

    pub fn with_channels(mut self, channels_per_lun: u32, channel: Channel) -> Self {
        self.channels_per_lun = channels_per_lun;
        self.channel = channel;
        self
    }

    pub fn with_page_sizes(mut self, sizes: &[u32]) -> Self {
        self.page_sizes = SmallVec::from_slice(sizes);
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.luns > 0, "geometry has no LUNs");
        ensure!(self.blocks_per_lun > 0, "geometry has no blocks per LUN");
        ensure!(self.pages_per_block > 0, "geometry has no pages per block");
        ensure!(self.channels_per_lun > 0, "geometry has no channels per LUN");
        ensure!(
            !self.page_sizes.is_empty(),
            "geometry advertises no page transfer sizes"
        );
        ensure!(
            self.page_sizes.iter().all(|&s| s > 0),
            "geometry advertises a zero-sized page transfer"
        );
        Ok(())
    }

    pub fn pages_per_lun(&self) -> u64 {
        self.blocks_per_lun as u64 * self.pages_per_block as u64
    }

    pub fn total_pages(&self) -> u64 {
        self.luns as u64 * self.pages_per_lun()
    }

    pub fn contains(&self, addr: PageAddr) -> bool {
        addr.lun < self.luns && addr.block < self.blocks_per_lun && addr.page < self.pages_per_block
    }

    pub fn flat_index(&self, addr: PageAddr) -> u64 {
        (addr.lun as u64 * self.blocks_per_lun as u64 + addr.block as u64)
            * self.pages_per_block as u64
            + addr.page as u64
    }

    pub fn addr_of(&self, index: u64) -> PageAddr {
        let ppb = self.pages_per_block as u64;
        let page = index % ppb;
        let block_index = index / ppb;
        let block = block_index % self.blocks_per_lun as u64;
        let lun = block_index / self.blocks_per_lun as u64;

        PageAddr::new(lun as u32, block as u32, page as u32)
    }

    /// Address following `addr` in probe order, wrapping to `0:0:0`.
    pub fn next_addr(&self, addr: PageAddr) -> PageAddr {
        let mut next = addr;
        next.page += 1;
        if next.page == self.pages_per_block {
            next.page = 0;
            next.block += 1;
            if next.block == self.blocks_per_lun {
                next.block = 0;
                next.lun += 1;
                if next.lun == self.luns {
                    next.lun = 0;
                }
            }
        }
        next
    }

    pub(crate) fn build_luns(&self) -> Vec<Lun> {
        (0..self.luns)
            .map(|lun| Lun {
                blocks: (0..self.blocks_per_lun)
                    .map(|block| Block {
                        pages: (0..self.pages_per_block)
                            .map(|page| Page {
                                addr: PageAddr::new(lun, block, page),
                                allocated: false,
                                erased: false,
                                sizes: self.page_sizes.clone(),
                            })
                            .collect(),
                        has_stale_pages: false,
                    })
                    .collect(),
                pages_per_block: self.pages_per_block,
                channels: vec![self.channel; self.channels_per_lun as usize],
            })
            .collect()
    }
}

/// Geometry payload filled in by the `NVM_GET_GEOMETRY` ioctl.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RawGeometry {
    pub nr_luns: u32,
    pub nr_blocks_per_lun: u32,
    pub nr_pages_per_block: u32,
    pub nr_channels: u32,
    pub gran_write: u32,
    pub gran_read: u32,
    pub gran_erase: u32,
    pub nr_page_sizes: u32,
    pub page_sizes: [u32; RAW_MAX_PAGE_SIZES],
}

impl TryFrom<RawGeometry> for Geometry {
    type Error = eyre::Report;

    fn try_from(raw: RawGeometry) -> Result<Self> {
        ensure!(
            raw.nr_page_sizes as usize <= RAW_MAX_PAGE_SIZES,
            "device reports {} page sizes, at most {} supported",
            raw.nr_page_sizes,
            RAW_MAX_PAGE_SIZES
        );

        let geometry = Geometry {
            luns: raw.nr_luns,
            blocks_per_lun: raw.nr_blocks_per_lun,
            pages_per_block: raw.nr_pages_per_block,
            channels_per_lun: raw.nr_channels,
            channel: Channel {
                gran_write: raw.gran_write,
                gran_read: raw.gran_read,
                gran_erase: raw.gran_erase,
            },
            page_sizes: SmallVec::from_slice(&raw.page_sizes[..raw.nr_page_sizes as usize]),
        };

        geometry.validate()?;
        Ok(geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::FromZeros;

    #[test]
    fn total_pages_multiplies_dimensions() {
        let g = Geometry::new(2, 2, 4);

        assert_eq!(g.total_pages(), 16);
        assert_eq!(g.pages_per_lun(), 8);
    }

    #[test]
    fn flat_index_and_addr_of_agree() {
        let g = Geometry::new(3, 5, 7);

        for index in 0..g.total_pages() {
            let addr = g.addr_of(index);
            assert!(g.contains(addr));
            assert_eq!(g.flat_index(addr), index);
        }
    }

    #[test]
    fn next_addr_wraps_page_block_and_lun() {
        let g = Geometry::new(2, 2, 4);

        assert_eq!(g.next_addr(PageAddr::new(0, 0, 0)), PageAddr::new(0, 0, 1));
        assert_eq!(g.next_addr(PageAddr::new(0, 0, 3)), PageAddr::new(0, 1, 0));
        assert_eq!(g.next_addr(PageAddr::new(0, 1, 3)), PageAddr::new(1, 0, 0));
        assert_eq!(g.next_addr(PageAddr::new(1, 1, 3)), PageAddr::new(0, 0, 0));
    }

    #[test]
    fn next_addr_follows_flat_order() {
        let g = Geometry::new(2, 3, 2);
        let mut addr = PageAddr::new(0, 0, 0);

        for index in 0..g.total_pages() {
            assert_eq!(g.flat_index(addr), index);
            addr = g.next_addr(addr);
        }
        assert_eq!(addr, PageAddr::new(0, 0, 0));
    }

    #[test]
    fn contains_rejects_out_of_range() {
        let g = Geometry::new(2, 2, 4);

        assert!(g.contains(PageAddr::new(1, 1, 3)));
        assert!(!g.contains(PageAddr::new(2, 0, 0)));
        assert!(!g.contains(PageAddr::new(0, 2, 0)));
        assert!(!g.contains(PageAddr::new(0, 0, 4)));
    }

    #[test]
    fn validate_rejects_empty_dimensions() {
        assert!(Geometry::new(0, 1, 1).validate().is_err());
        assert!(Geometry::new(1, 0, 1).validate().is_err());
        assert!(Geometry::new(1, 1, 0).validate().is_err());
        assert!(Geometry::new(1, 1, 1).with_page_sizes(&[]).validate().is_err());
        assert!(Geometry::new(1, 1, 1).validate().is_ok());
    }

    #[test]
    fn build_luns_populates_every_page() {
        let g = Geometry::new(2, 3, 4).with_page_sizes(&[4096, 16384]);
        let luns = g.build_luns();

        assert_eq!(luns.len(), 2);
        for (l, lun) in luns.iter().enumerate() {
            assert_eq!(lun.blocks.len(), 3);
            assert_eq!(lun.pages_per_block, 4);
            assert_eq!(lun.channels.len(), 1);
            for (b, block) in lun.blocks.iter().enumerate() {
                assert!(!block.has_stale_pages);
                for (p, page) in block.pages.iter().enumerate() {
                    assert_eq!(page.addr, PageAddr::new(l as u32, b as u32, p as u32));
                    assert!(!page.allocated);
                    assert_eq!(page.sizes.as_slice(), &[4096, 16384]);
                }
            }
        }
    }

    #[test]
    fn raw_geometry_converts() {
        let mut raw = RawGeometry::new_zeroed();
        raw.nr_luns = 4;
        raw.nr_blocks_per_lun = 1024;
        raw.nr_pages_per_block = 256;
        raw.nr_channels = 2;
        raw.gran_write = 4096;
        raw.gran_read = 4096;
        raw.gran_erase = 1 << 20;
        raw.nr_page_sizes = 2;
        raw.page_sizes[0] = 4096;
        raw.page_sizes[1] = 8192;

        let g = Geometry::try_from(raw).unwrap();

        assert_eq!(g.luns, 4);
        assert_eq!(g.total_pages(), 4 * 1024 * 256);
        assert_eq!(g.channels_per_lun, 2);
        assert_eq!(g.channel.gran_erase, 1 << 20);
        assert_eq!(g.page_sizes.as_slice(), &[4096, 8192]);
    }

    #[test]
    fn raw_geometry_rejects_zeroed_payload() {
        let raw = RawGeometry::new_zeroed();

        assert!(Geometry::try_from(raw).is_err());
    }

    #[test]
    fn raw_geometry_rejects_too_many_sizes() {
        let mut raw = RawGeometry::new_zeroed();
        raw.nr_luns = 1;
        raw.nr_blocks_per_lun = 1;
        raw.nr_pages_per_block = 1;
        raw.nr_channels = 1;
        raw.nr_page_sizes = RAW_MAX_PAGE_SIZES as u32 + 1;

        let err = Geometry::try_from(raw).unwrap_err();
        assert!(err.to_string().contains("page sizes"));
    }
}
