//! # File and Device Options
//!
//! `FileOptions` carries everything a file constructor needs to decide how a
//! descriptor is read or written: OS page-cache usage, mmap vs buffered
//! writes, sync cadence, preallocation mode, buffer sizes and the optional
//! rate limiter shared by all writers of a database.
//!
//! `DeviceOptions` configures how a [`Device`](crate::device::Device) is
//! opened.
//!
//! ## Defaults
//!
//! | Option                   | Default                     |
//! |--------------------------|-----------------------------|
//! | use_os_buffer            | true                        |
//! | use_mmap_reads           | false                       |
//! | use_mmap_writes          | false                       |
//! | bytes_per_sync           | `DEFAULT_BYTES_PER_SYNC`    |
//! | fallocate_with_keep_size | true                        |
//! | write_buffer_size        | `DEFAULT_WRITE_BUFFER_SIZE` |
//! | mmap_increment           | `DEFAULT_MMAP_INCREMENT`    |
//! | rate_limiter             | none                        |
//! | location                 | `DEFAULT_NVM_DEVICE`        |
//! | max_alloc_try_count      | total page count            |

use std::fmt;
use std::sync::Arc;

use super::constants::{
    DEFAULT_BYTES_PER_SYNC, DEFAULT_MMAP_INCREMENT, DEFAULT_NVM_DEVICE, DEFAULT_WRITE_BUFFER_SIZE,
};
use crate::io::RateLimiter;

#[derive(Clone)]
pub struct FileOptions {
    pub use_os_buffer: bool,
    pub use_mmap_reads: bool,
    pub use_mmap_writes: bool,
    pub bytes_per_sync: u64,
    pub fallocate_with_keep_size: bool,
    pub write_buffer_size: usize,
    pub mmap_increment: usize,
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            use_os_buffer: true,
            use_mmap_reads: false,
            use_mmap_writes: false,
            bytes_per_sync: DEFAULT_BYTES_PER_SYNC,
            fallocate_with_keep_size: true,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            mmap_increment: DEFAULT_MMAP_INCREMENT,
            rate_limiter: None,
        }
    }
}

impl fmt::Debug for FileOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileOptions")
            .field("use_os_buffer", &self.use_os_buffer)
            .field("use_mmap_reads", &self.use_mmap_reads)
            .field("use_mmap_writes", &self.use_mmap_writes)
            .field("bytes_per_sync", &self.bytes_per_sync)
            .field("fallocate_with_keep_size", &self.fallocate_with_keep_size)
            .field("write_buffer_size", &self.write_buffer_size)
            .field("mmap_increment", &self.mmap_increment)
            .field("rate_limiter", &self.rate_limiter.is_some())
            .finish()
    }
}

impl FileOptions {
    /// When false, readers drop the ranges they read from the OS page cache.
    pub fn use_os_buffer(mut self, enabled: bool) -> Self {
        self.use_os_buffer = enabled;
        self
    }

    /// Serve random-access reads from a read-only mapping.
    pub fn use_mmap_reads(mut self, enabled: bool) -> Self {
        self.use_mmap_reads = enabled;
        self
    }

    /// Use the growable mmap writer instead of the buffered append writer.
    pub fn use_mmap_writes(mut self, enabled: bool) -> Self {
        self.use_mmap_writes = enabled;
        self
    }

    /// Defers `sync()`/`fsync()` of buffered writers until at least `bytes`
    /// were appended since the last durable point. 0 disables the cadence.
    pub fn bytes_per_sync(mut self, bytes: u64) -> Self {
        self.bytes_per_sync = bytes;
        self
    }

    pub fn fallocate_with_keep_size(mut self, enabled: bool) -> Self {
        self.fallocate_with_keep_size = enabled;
        self
    }

    pub fn write_buffer_size(mut self, bytes: usize) -> Self {
        self.write_buffer_size = bytes;
        self
    }

    pub fn mmap_increment(mut self, bytes: usize) -> Self {
        self.mmap_increment = bytes;
        self
    }

    /// Shares `limiter` between every writer opened with these options.
    pub fn rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }
}

#[derive(Debug, Clone)]
pub struct DeviceOptions {
    pub location: String,
    pub max_alloc_try_count: Option<u64>,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            location: DEFAULT_NVM_DEVICE.to_string(),
            max_alloc_try_count: None,
        }
    }
}

impl DeviceOptions {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Self::default()
        }
    }

    /// Caps the number of pages probed per `request_page()`. Values above the
    /// device's total page count are clamped to it.
    pub fn max_alloc_try_count(mut self, count: u64) -> Self {
        self.max_alloc_try_count = Some(count);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_options_defaults_match_constants() {
        let opts = FileOptions::default();

        assert!(opts.use_os_buffer);
        assert!(!opts.use_mmap_writes);
        assert_eq!(opts.write_buffer_size, DEFAULT_WRITE_BUFFER_SIZE);
        assert_eq!(opts.mmap_increment, DEFAULT_MMAP_INCREMENT);
        assert_eq!(opts.bytes_per_sync, DEFAULT_BYTES_PER_SYNC);
        assert!(opts.rate_limiter.is_none());
    }

    #[test]
    fn file_options_builder_chains() {
        let opts = FileOptions::default()
            .use_mmap_writes(true)
            .mmap_increment(8192)
            .bytes_per_sync(1 << 20)
            .use_os_buffer(false);

        assert!(opts.use_mmap_writes);
        assert_eq!(opts.mmap_increment, 8192);
        assert_eq!(opts.bytes_per_sync, 1 << 20);
        assert!(!opts.use_os_buffer);
    }

    #[test]
    fn device_options_default_location() {
        let opts = DeviceOptions::default();

        assert_eq!(opts.location, DEFAULT_NVM_DEVICE);
        assert_eq!(opts.max_alloc_try_count, None);
    }

    #[test]
    fn device_options_custom_try_count() {
        let opts = DeviceOptions::new("/dev/nvm1").max_alloc_try_count(8);

        assert_eq!(opts.location, "/dev/nvm1");
        assert_eq!(opts.max_alloc_try_count, Some(8));
    }
}
