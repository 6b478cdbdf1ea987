//! # Mapped Region
//!
//! One writable window of a file, used by `MmapWriter`. Offsets are relative
//! to the start of the window:
//!
//! ```text
//! file_offset
//! │
//! ├──── synced ────┼──── written ────┼──── free ────┤
//! 0            last_sync            dst            len
//! ```
//!
//! `0 <= last_sync <= dst <= len` holds after every mutation. `write` only
//! moves `dst`; `sync` moves `last_sync` up to `dst`. Dropping the region
//! unmaps it; dirty pages stay in the page cache until the descriptor is
//! synced.

use std::fs::File;
use std::io;

use eyre::{Result, WrapErr};
use memmap2::{MmapMut, MmapOptions};

use super::sys::{round_down, round_up};

#[derive(Debug)]
pub struct MappedRegion {
    map: MmapMut,
    file_offset: u64,
    dst: usize,
    last_sync: usize,
}

impl MappedRegion {
    /// Maps `[file_offset, file_offset + len)` of `file`. The range must
    /// already exist in the file and `file_offset` must be page aligned.
    pub fn map(file: &File, file_offset: u64, len: usize) -> Result<Self> {
        // SAFETY: MmapOptions::map_mut is unsafe because the mapped file may
        // be modified or truncated behind the mapping. This is safe because:
        // 1. The caller extended the file to cover the whole range first
        // 2. The writer owning this region is the only writer of the file
        // 3. The file is only truncated after the region has been dropped
        let map = unsafe {
            MmapOptions::new()
                .offset(file_offset)
                .len(len)
                .map_mut(file)
                .wrap_err_with(|| {
                    format!("failed to map {} bytes at file offset {}", len, file_offset)
                })?
        };

        Ok(Self {
            map,
            file_offset,
            dst: 0,
            last_sync: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }

    /// Bytes written into this region.
    pub fn written(&self) -> usize {
        self.dst
    }

    pub fn remaining(&self) -> usize {
        self.map.len() - self.dst
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    /// File offset one past the last written byte.
    pub fn end_offset(&self) -> u64 {
        self.file_offset + self.dst as u64
    }

    pub fn has_unsynced(&self) -> bool {
        self.last_sync < self.dst
    }

    /// Copies as much of `data` as fits and returns the number of bytes taken.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.remaining());
        self.map[self.dst..self.dst + n].copy_from_slice(&data[..n]);
        self.dst += n;
        self.check_invariants();
        n
    }

    /// Flushes the pages covering `[last_sync, dst)` and advances `last_sync`.
    pub fn sync(&mut self, page_size: usize) -> io::Result<()> {
        if !self.has_unsynced() {
            return Ok(());
        }

        let start = round_down(self.last_sync, page_size);
        let end = round_up(self.dst, page_size).min(self.map.len());
        self.map.flush_range(start, end - start)?;

        self.last_sync = self.dst;
        self.check_invariants();
        Ok(())
    }

    fn check_invariants(&self) {
        debug_assert!(
            self.last_sync <= self.dst && self.dst <= self.map.len(),
            "region offsets out of order: last_sync={} dst={} len={}",
            self.last_sync,
            self.dst,
            self.map.len()
        );
    }
}
