//! # nvmstore Configuration Module
//!
//! Centralizes the numeric defaults used across the crate and the option
//! structs handed to the device and file constructors.
//!
//! ## Module Organization
//!
//! - `constants`: Numeric configuration values with dependency documentation
//! - `options`: `FileOptions` (per-file I/O behaviour) and `DeviceOptions`
//!   (allocator construction)
//!
//! ## Usage
//!
//! ```ignore
//! use nvmstore::config::{FileOptions, DEFAULT_WRITE_BUFFER_SIZE};
//!
//! let opts = FileOptions::default()
//!     .use_mmap_writes(true)
//!     .mmap_increment(1 << 20)
//!     .bytes_per_sync(4 << 20);
//! ```

pub mod constants;
mod options;

pub use constants::*;
pub use options::{DeviceOptions, FileOptions};
