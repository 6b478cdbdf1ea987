//! # Growable Mmap Writer
//!
//! `MmapWriter` appends by copying into a writable mapping of the file's
//! tail. The mapping covers a fixed increment (rounded up to the OS page
//! size); when it fills, the writer moves to the next window:
//!
//! ```text
//!            region 0            region 1            region 2
//! file: [ increment bytes ][ increment bytes ][ increment  ...
//!       ^ file_offset                         ^ current window
//!                                              ├── written ──┤ dst
//! ```
//!
//! ## Region Transitions
//!
//! 1. `unmap_current_region`: drop the mapping. If it holds bytes that were
//!    never msync'ed, the descriptor needs an fdatasync (`pending_sync`).
//! 2. `map_new_region`: extend the file by one increment (fallocate or
//!    `set_len`), then map the new window. File metadata changed, so
//!    `pending_sync` is set.
//!
//! The first window is mapped lazily on the first append and is not counted
//! by `remap_count()`.
//!
//! ## Sizes
//!
//! The on-disk size grows in increments and is always >= the logical size
//! (`file_size()`). `close()` truncates the file to the logical size.

use std::fs::File;
use std::path::{Path, PathBuf};

use eyre::{bail, ensure, Result, WrapErr};
use tracing::{debug, trace, warn};

use super::region::MappedRegion;
use super::sys::{self, page_size, round_up};
use super::traits::{Preallocatable, Syncable, Writer};
use crate::config::FileOptions;
use crate::error::NvmError;

#[derive(Debug)]
pub struct MmapWriter {
    path: PathBuf,
    file: Option<File>,
    page_size: usize,
    map_size: usize,
    region: Option<MappedRegion>,
    /// File offset of the current region, or of the next one when unmapped.
    file_offset: u64,
    pending_sync: bool,
    remap_count: u64,
    fallocate_with_keep_size: bool,
}

impl MmapWriter {
    /// Wraps an empty, writable `file`.
    pub fn new<P: AsRef<Path>>(path: P, file: File, options: &FileOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        ensure!(options.mmap_increment > 0, "mmap increment must be non-zero");

        let len = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?
            .len();
        ensure!(
            len == 0,
            "mmap writer needs an empty file, '{}' has {} bytes",
            path.display(),
            len
        );

        let page_size = page_size();
        let map_size = round_up(options.mmap_increment, page_size);

        Ok(Self {
            path,
            file: Some(file),
            page_size,
            map_size,
            region: None,
            file_offset: 0,
            pending_sync: false,
            remap_count: 0,
            fallocate_with_keep_size: options.fallocate_with_keep_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of each mapping window.
    pub fn map_size(&self) -> usize {
        self.map_size
    }

    /// Number of window transitions after the first mapping.
    pub fn remap_count(&self) -> u64 {
        self.remap_count
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    fn file(&self) -> Result<&File> {
        match self.file.as_ref() {
            Some(file) => Ok(file),
            None => bail!("'{}' is already closed", self.path.display()),
        }
    }

    fn unmap_current_region(&mut self) {
        if let Some(region) = self.region.take() {
            if region.has_unsynced() {
                self.pending_sync = true;
            }
            self.file_offset += region.len() as u64;
            trace!(path = %self.path.display(), offset = self.file_offset, "region unmapped");
        }
    }

    fn map_new_region(&mut self) -> Result<()> {
        let offset = self.file_offset;
        let len = self.map_size;

        let file = self.file()?;
        sys::preallocate(file, offset, len as u64, false).wrap_err_with(|| {
            format!(
                "failed to extend '{}' to {} bytes",
                self.path.display(),
                offset + len as u64
            )
        })?;
        let region = MappedRegion::map(file, offset, len)
            .wrap_err_with(|| format!("failed to map region of '{}'", self.path.display()))?;

        self.region = Some(region);
        self.pending_sync = true;
        debug!(path = %self.path.display(), offset, len, "region mapped");
        Ok(())
    }

    fn msync(&mut self) -> Result<()> {
        let page_size = self.page_size;
        if let Some(region) = self.region.as_mut() {
            region.sync(page_size).wrap_err_with(|| NvmError::Sync {
                path: self.path.clone(),
            })?;
        }
        Ok(())
    }
}

impl Writer for MmapWriter {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file()?;

        let mut remaining = data;
        while !remaining.is_empty() {
            let needs_region = self.region.as_ref().map_or(true, MappedRegion::is_full);
            if needs_region {
                if self.region.is_some() {
                    self.unmap_current_region();
                    self.remap_count += 1;
                }
                self.map_new_region()?;
            }

            let Some(region) = self.region.as_mut() else {
                bail!("no mapped region for '{}'", self.path.display());
            };
            let n = region.write(remaining);
            remaining = &remaining[n..];
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Ok(());
        }

        let size = self.file_size();
        self.unmap_current_region();
        // A failed truncate must leave the logical size in place for a retry.
        self.file_offset = size;

        self.file()?
            .set_len(size)
            .wrap_err_with(|| {
                format!("failed to truncate '{}' to {} bytes", self.path.display(), size)
            })?;

        if let Some(file) = self.file.take() {
            sys::close_file(file)
                .wrap_err_with(|| format!("failed to close '{}'", self.path.display()))?;
        }

        debug!(
            path = %self.path.display(),
            size,
            remaps = self.remap_count,
            "mmap writer closed"
        );
        Ok(())
    }

    fn file_size(&self) -> u64 {
        match &self.region {
            Some(region) => region.end_offset(),
            None => self.file_offset,
        }
    }

    fn invalidate_cache(&self, offset: u64, len: u64) -> Result<()> {
        if let Ok(file) = self.file() {
            sys::invalidate_cache(file, &self.path, offset, len);
        }
        Ok(())
    }

    fn unique_id(&self) -> Option<Vec<u8>> {
        self.file.as_ref().and_then(sys::unique_id_for)
    }
}

impl Syncable for MmapWriter {
    fn sync(&mut self) -> Result<()> {
        if self.pending_sync {
            self.file()?.sync_data().wrap_err_with(|| NvmError::Sync {
                path: self.path.clone(),
            })?;
            self.pending_sync = false;
        }
        self.msync()
    }

    fn fsync(&mut self) -> Result<()> {
        if self.pending_sync {
            self.file()?.sync_all().wrap_err_with(|| NvmError::Sync {
                path: self.path.clone(),
            })?;
            self.pending_sync = false;
        }
        self.msync()
    }
}

impl Preallocatable for MmapWriter {
    fn allocate(&mut self, offset: u64, len: u64) -> Result<()> {
        let keep_size = self.fallocate_with_keep_size;
        sys::preallocate(self.file()?, offset, len, keep_size).wrap_err_with(|| {
            format!(
                "failed to preallocate {} bytes at offset {} in '{}'",
                len,
                offset,
                self.path.display()
            )
        })
    }
}

impl Drop for MmapWriter {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(e) = self.close() {
                warn!(path = %self.path.display(), error = %e, "close on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::tempdir;

    fn create(path: &Path, increment: usize) -> MmapWriter {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .unwrap();
        MmapWriter::new(path, file, &FileOptions::default().mmap_increment(increment)).unwrap()
    }

    fn disk_len(path: &Path) -> u64 {
        std::fs::metadata(path).unwrap().len()
    }

    #[test]
    fn increment_is_rounded_to_page_size() {
        let dir = tempdir().unwrap();
        let w = create(&dir.path().join("round.dat"), 1);

        assert_eq!(w.map_size(), page_size());
    }

    #[test]
    fn first_region_is_mapped_lazily() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lazy.dat");
        let w = create(&path, 4096);

        assert_eq!(disk_len(&path), 0);
        assert_eq!(w.file_size(), 0);
        assert_eq!(w.remap_count(), 0);
    }

    #[test]
    fn overflowing_one_window_remaps_once_and_close_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grow.dat");
        let mut w = create(&path, page_size());
        let data: Vec<u8> = (0..page_size() + 904).map(|i| (i % 251) as u8).collect();

        w.append(&data).unwrap();

        assert_eq!(w.remap_count(), 1);
        assert_eq!(w.file_size(), data.len() as u64);
        assert_eq!(disk_len(&path), 2 * page_size() as u64);

        w.close().unwrap();

        assert_eq!(disk_len(&path), data.len() as u64);
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[test]
    fn exact_fill_does_not_remap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exact.dat");
        let mut w = create(&path, page_size());

        w.append(&vec![1u8; page_size()]).unwrap();
        assert_eq!(w.remap_count(), 0);

        w.append(b"x").unwrap();
        assert_eq!(w.remap_count(), 1);
        assert_eq!(w.file_size(), page_size() as u64 + 1);
    }

    #[test]
    fn many_small_appends_preserve_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("small.dat");
        let mut w = create(&path, page_size());

        let mut expected = Vec::new();
        for i in 0..1000u32 {
            let record = i.to_le_bytes();
            w.append(&record).unwrap();
            expected.extend_from_slice(&record);
        }
        w.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), expected);
    }

    #[test]
    fn sync_clears_pending_and_msyncs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync.dat");
        let mut w = create(&path, page_size());

        w.append(b"abc").unwrap();
        assert!(w.pending_sync);

        w.sync().unwrap();

        assert!(!w.pending_sync);
        assert!(!w.region.as_ref().unwrap().has_unsynced());

        w.fsync().unwrap();
        assert!(!w.pending_sync);
    }

    #[test]
    fn remap_after_sync_sets_pending_sync() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pending.dat");
        let mut w = create(&path, page_size());

        w.append(&vec![3u8; page_size()]).unwrap();
        w.sync().unwrap();
        assert!(!w.pending_sync);

        w.append(b"next").unwrap();
        assert!(w.pending_sync);
    }

    #[test]
    fn close_of_empty_writer_leaves_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.dat");
        let mut w = create(&path, page_size());

        w.close().unwrap();

        assert_eq!(disk_len(&path), 0);
        assert!(w.is_closed());
        assert!(w.append(b"late").is_err());
    }

    #[test]
    fn non_empty_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("full.dat");
        std::fs::write(&path, b"data").unwrap();
        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();

        let err = MmapWriter::new(&path, file, &FileOptions::default()).unwrap_err();

        assert!(err.to_string().contains("needs an empty file"));
    }

    #[test]
    fn drop_truncates_to_logical_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("drop.dat");
        {
            let mut w = create(&path, page_size());
            w.append(b"tail").unwrap();
        }

        assert_eq!(std::fs::read(&path).unwrap(), b"tail");
    }

    #[test]
    fn failed_truncate_keeps_logical_size_for_retry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("retry.dat");
        let mut w = create(&path, page_size());
        w.append(b"tail").unwrap();

        let read_only = File::open(&path).unwrap();
        let writable = w.file.replace(read_only).unwrap();

        assert!(w.close().is_err());
        assert_eq!(w.file_size(), 4);
        assert!(!w.is_closed());

        w.file = Some(writable);
        w.close().unwrap();

        assert_eq!(disk_len(&path), 4);
        assert_eq!(std::fs::read(&path).unwrap(), b"tail");
    }
}
