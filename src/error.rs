//! # Error Taxonomy
//!
//! All fallible operations in nvmstore return `eyre::Result`. Plain I/O
//! failures are `std::io::Error`s wrapped with the path and operation that
//! failed. The failures a caller has to tell apart are raised as an
//! [`NvmError`], either directly (`bail!(NvmError::Exhausted { .. })`) or as
//! context on top of the underlying I/O error, so both are reachable with
//! `downcast_ref`:
//!
//! ```ignore
//! match device.request_page() {
//!     Ok(addr) => use_page(addr),
//!     Err(e) if matches!(e.downcast_ref::<NvmError>(), Some(NvmError::Exhausted { .. })) => {
//!         trigger_reclaim();
//!     }
//!     Err(e) => return Err(e),
//! }
//! ```
//!
//! | Variant      | Raised by                         | Recoverable            |
//! |--------------|-----------------------------------|------------------------|
//! | `Exhausted`  | `Device::request_page`            | yes, after reclamation |
//! | `DeviceInit` | `Device` constructors             | no, object not created |
//! | `Sync`       | `sync`/`fsync`/`close` of writers | data kept, durability unknown |
//!
//! Cache invalidation failures never produce an error; they are logged and
//! ignored.

use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NvmError {
    Exhausted { probed: u64 },
    DeviceInit { location: String, reason: String },
    Sync { path: PathBuf },
}

impl NvmError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, NvmError::Exhausted { .. })
    }
}

impl fmt::Display for NvmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NvmError::Exhausted { probed } => {
                write!(f, "no allocatable page found after probing {} pages", probed)
            }
            NvmError::DeviceInit { location, reason } => {
                write!(f, "failed to initialize device '{}': {}", location, reason)
            }
            NvmError::Sync { path } => write!(f, "failed to sync '{}'", path.display()),
        }
    }
}

impl std::error::Error for NvmError {}

/// Returns the `NvmError` carried by `report`, if any.
pub fn nvm_error(report: &eyre::Report) -> Option<&NvmError> {
    report.downcast_ref::<NvmError>()
}
