//! # Device Control
//!
//! The allocator learns the device layout through a `DeviceControl`: open
//! the device, ask it to describe itself, keep the handle for the device's
//! lifetime.
//!
//! - [`CharDevice`]: an Open-Channel character device. Geometry is queried
//!   with the `NVM_GET_GEOMETRY` ioctl, which fills a [`RawGeometry`].
//! - [`EmulatedDevice`]: a fixed geometry with no backing hardware, used for
//!   device emulation and tests.
//!
//! Both report failures as `NvmError::DeviceInit`; `Device` constructors
//! never produce a partially initialised device.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::Path;

use eyre::{bail, Result};
use zerocopy::{FromZeros, IntoBytes};

use super::geometry::{Geometry, RawGeometry};
use crate::error::NvmError;

pub trait DeviceControl: Send + Sync {
    /// Path or name the device was opened from.
    fn location(&self) -> &str;

    /// Queries the live geometry. Called once at `Device` construction.
    fn describe_geometry(&self) -> Result<Geometry>;
}

const NVM_IOCTL_MAGIC: u32 = b'L' as u32;
const NVM_IOCTL_GET_GEOMETRY_NR: u32 = 0x20;

/// `_IOR('L', 0x20, struct RawGeometry)` in the Linux asm-generic encoding.
const fn ior(ty: u32, nr: u32, size: usize) -> u64 {
    const IOC_READ: u64 = 2;
    const IOC_NRSHIFT: u64 = 0;
    const IOC_TYPESHIFT: u64 = 8;
    const IOC_SIZESHIFT: u64 = 16;
    const IOC_DIRSHIFT: u64 = 30;

    (IOC_READ << IOC_DIRSHIFT)
        | ((size as u64) << IOC_SIZESHIFT)
        | ((ty as u64) << IOC_TYPESHIFT)
        | ((nr as u64) << IOC_NRSHIFT)
}

pub const NVM_GET_GEOMETRY: u64 = ior(
    NVM_IOCTL_MAGIC,
    NVM_IOCTL_GET_GEOMETRY_NR,
    std::mem::size_of::<RawGeometry>(),
);

#[derive(Debug)]
pub struct CharDevice {
    location: String,
    file: File,
}

impl CharDevice {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let location = path.display().to_string();

        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) => bail!(NvmError::DeviceInit {
                location,
                reason: format!("open failed: {}", e),
            }),
        };

        Ok(Self { location, file })
    }

    fn ioctl_geometry(&self) -> std::io::Result<RawGeometry> {
        let mut raw = RawGeometry::new_zeroed();

        // SAFETY: NVM_GET_GEOMETRY is a read ioctl whose encoded size equals
        // size_of::<RawGeometry>(), so the driver writes at most that many
        // bytes into `raw`. RawGeometry is repr(C), plain-old-data and valid
        // for any bit pattern (FromBytes), so a partial write cannot produce
        // an invalid value. The fd stays open for the duration of the call
        // because `self.file` is borrowed.
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                NVM_GET_GEOMETRY as _,
                raw.as_mut_bytes().as_mut_ptr(),
            )
        };

        if rc < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(raw)
    }
}

impl DeviceControl for CharDevice {
    fn location(&self) -> &str {
        &self.location
    }

    fn describe_geometry(&self) -> Result<Geometry> {
        let raw = match self.ioctl_geometry() {
            Ok(raw) => raw,
            Err(e) => bail!(NvmError::DeviceInit {
                location: self.location.clone(),
                reason: format!("geometry ioctl failed: {}", e),
            }),
        };

        match Geometry::try_from(raw) {
            Ok(geometry) => Ok(geometry),
            Err(e) => bail!(NvmError::DeviceInit {
                location: self.location.clone(),
                reason: format!("invalid geometry: {}", e),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmulatedDevice {
    location: String,
    geometry: Geometry,
}

impl EmulatedDevice {
    pub fn new(location: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            location: location.into(),
            geometry,
        }
    }
}

impl DeviceControl for EmulatedDevice {
    fn location(&self) -> &str {
        &self.location
    }

    fn describe_geometry(&self) -> Result<Geometry> {
        if let Err(e) = self.geometry.validate() {
            bail!(NvmError::DeviceInit {
                location: self.location.clone(),
                reason: format!("invalid geometry: {}", e),
            });
        }
        Ok(self.geometry.clone())
    }
}
