//! # Buffered Append Writer
//!
//! `BufferedWriter` accumulates appends in a fixed-capacity buffer and writes
//! them to the descriptor in large sequential chunks.
//!
//! ## Append Path
//!
//! ```text
//! append(data)
//!   ├── buffered + data > capacity ──> write buffer out (rate limited)
//!   ├── data > capacity            ──> write data directly (rate limited)
//!   └── otherwise                  ──> copy into buffer
//! file_size += data.len()
//! ```
//!
//! Every append-path write is split into chunks approved by the rate
//! limiter. An explicit `flush()` bypasses the limiter.
//!
//! ## Offsets
//!
//! ```text
//! 0                    flushed_size          file_size
//! ├──── on descriptor ────┼──── in buffer ────┤
//! ```
//!
//! Writes are positioned at `flushed_size`, so the writer never depends on
//! the descriptor's file cursor.
//!
//! ## Durability
//!
//! `sync()` (fdatasync) and `fsync()` run only when something was appended
//! since the last durable point. With `bytes_per_sync` configured they are
//! also deferred until that many bytes accumulated; a deferred call still
//! returns `Ok`. `close()` discharges any pending obligation regardless of
//! the cadence, trims preallocated space past the logical size and reports
//! the result of `close(2)`.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{bail, Result, WrapErr};
use tracing::{debug, trace, warn};

use super::rate_limiter::{acquire, RateLimiter};
use super::sys;
use super::traits::{Preallocatable, Syncable, Writer};
use crate::config::FileOptions;
use crate::error::NvmError;

pub struct BufferedWriter {
    path: PathBuf,
    file: Option<File>,
    buf: Vec<u8>,
    capacity: usize,
    flushed_size: u64,
    file_size: u64,
    pending_sync: bool,
    pending_fsync: bool,
    last_sync_size: u64,
    bytes_per_sync: u64,
    allocated_to: u64,
    fallocate_with_keep_size: bool,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
}

impl std::fmt::Debug for BufferedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedWriter")
            .field("path", &self.path)
            .field("capacity", &self.capacity)
            .field("buffered", &self.buf.len())
            .field("file_size", &self.file_size)
            .field("pending_sync", &self.pending_sync)
            .field("pending_fsync", &self.pending_fsync)
            .finish_non_exhaustive()
    }
}

impl BufferedWriter {
    /// Wraps `file`, appending after its current end.
    pub fn new<P: AsRef<Path>>(path: P, file: File, options: &FileOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if options.write_buffer_size == 0 {
            bail!("write buffer size must be at least 1 byte");
        }

        let existing = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?
            .len();

        Ok(Self {
            path,
            file: Some(file),
            buf: Vec::with_capacity(options.write_buffer_size),
            capacity: options.write_buffer_size,
            flushed_size: existing,
            file_size: existing,
            pending_sync: false,
            pending_fsync: false,
            last_sync_size: existing,
            bytes_per_sync: options.bytes_per_sync,
            allocated_to: existing,
            fallocate_with_keep_size: options.fallocate_with_keep_size,
            rate_limiter: options.rate_limiter.clone(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len()
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

    /// Writes `data` at `flushed_size`, one rate-limiter grant at a time when
    /// `limited`.
    fn write_out(&mut self, data: &[u8], limited: bool) -> Result<()> {
        let limiter = if limited {
            self.rate_limiter.clone()
        } else {
            None
        };

        let mut remaining = data;
        while !remaining.is_empty() {
            let chunk = match &limiter {
                Some(limiter) => acquire(limiter.as_ref(), remaining.len()),
                None => remaining.len(),
            };

            self.file()?
                .write_all_at(&remaining[..chunk], self.flushed_size)
                .wrap_err_with(|| {
                    format!(
                        "failed to write {} bytes at offset {} to '{}'",
                        chunk,
                        self.flushed_size,
                        self.path.display()
                    )
                })?;

            self.flushed_size += chunk as u64;
            remaining = &remaining[chunk..];
        }
        Ok(())
    }

    fn flush_buffer(&mut self, limited: bool) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }

        let buf = std::mem::take(&mut self.buf);
        let start = self.flushed_size;
        let result = self.write_out(&buf, limited);
        self.buf = buf;

        let written = (self.flushed_size - start) as usize;
        self.buf.drain(..written);

        trace!(path = %self.path.display(), bytes = written, "buffer flushed");
        result
    }

    fn sync_due(&self) -> bool {
        self.bytes_per_sync == 0 || self.file_size - self.last_sync_size >= self.bytes_per_sync
    }

    fn log_deferred(&self, op: &'static str) {
        debug!(
            path = %self.path.display(),
            op,
            unsynced = self.file_size - self.last_sync_size,
            bytes_per_sync = self.bytes_per_sync,
            "durability call deferred"
        );
    }

    fn trim_preallocated(&mut self) -> Result<()> {
        if self.allocated_to <= self.file_size {
            return Ok(());
        }
        let size = self.file_size;
        self.file()?
            .set_len(size)
            .wrap_err_with(|| {
                format!("failed to truncate '{}' to {} bytes", self.path.display(), size)
            })?;
        self.allocated_to = size;
        Ok(())
    }
}

impl Writer for BufferedWriter {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file()?;

        if self.buf.len() + data.len() > self.capacity {
            self.flush_buffer(true)?;
        }

        if data.len() > self.capacity {
            self.write_out(data, true)?;
        } else {
            self.buf.extend_from_slice(data);
        }

        self.file_size += data.len() as u64;
        self.pending_sync = true;
        self.pending_fsync = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file()?;
        self.flush_buffer(false)
    }

    fn close(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Ok(());
        }

        self.flush_buffer(false)?;
        self.trim_preallocated()?;

        if self.pending_sync || self.pending_fsync {
            self.file()?.sync_all().wrap_err_with(|| NvmError::Sync {
                path: self.path.clone(),
            })?;
            self.pending_sync = false;
            self.pending_fsync = false;
            self.last_sync_size = self.file_size;
        }

        if let Some(file) = self.file.take() {
            sys::close_file(file)
                .wrap_err_with(|| format!("failed to close '{}'", self.path.display()))?;
        }

        debug!(path = %self.path.display(), size = self.file_size, "buffered writer closed");
        Ok(())
    }

    fn file_size(&self) -> u64 {
        self.file_size
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

impl Syncable for BufferedWriter {
    fn sync(&mut self) -> Result<()> {
        self.flush()?;

        if !self.pending_sync {
            return Ok(());
        }
        if !self.sync_due() {
            self.log_deferred("sync");
            return Ok(());
        }

        self.file()?.sync_data().wrap_err_with(|| NvmError::Sync {
            path: self.path.clone(),
        })?;
        self.pending_sync = false;
        self.last_sync_size = self.file_size;
        Ok(())
    }

    fn fsync(&mut self) -> Result<()> {
        self.flush()?;

        if !self.pending_fsync {
            return Ok(());
        }
        if !self.sync_due() {
            self.log_deferred("fsync");
            return Ok(());
        }

        self.file()?.sync_all().wrap_err_with(|| NvmError::Sync {
            path: self.path.clone(),
        })?;
        self.pending_sync = false;
        self.pending_fsync = false;
        self.last_sync_size = self.file_size;
        Ok(())
    }

    fn range_sync(&mut self, offset: u64, nbytes: u64) -> Result<()> {
        sys::sync_range(self.file()?, offset, nbytes).wrap_err_with(|| NvmError::Sync {
            path: self.path.clone(),
        })
    }
}

impl Preallocatable for BufferedWriter {
    fn allocate(&mut self, offset: u64, len: u64) -> Result<()> {
        let keep_size = self.fallocate_with_keep_size;
        sys::preallocate(self.file()?, offset, len, keep_size).wrap_err_with(|| {
            format!(
                "failed to preallocate {} bytes at offset {} in '{}'",
                len,
                offset,
                self.path.display()
            )
        })?;
        self.allocated_to = self.allocated_to.max(offset + len);
        Ok(())
    }
}

impl Drop for BufferedWriter {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(e) = self.close() {
                warn!(path = %self.path.display(), error = %e, "close on drop failed");
            }
        }
    }
}
