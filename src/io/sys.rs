//! # Syscall Helpers
//!
//! Thin wrappers over the descriptor-level primitives the file types need
//! beyond what `std::fs` offers: page-cache advice, preallocation, ranged
//! writeback and file identity.
//!
//! ## Runtime Capabilities
//!
//! `fallocate` and `sync_file_range` are not available on every filesystem.
//! Support is detected on first use: when the kernel answers `EOPNOTSUPP` or
//! `ENOSYS` the capability is switched off for the rest of the process and
//! the helper falls back:
//!
//! | Helper        | Primary             | Fallback                         |
//! |---------------|---------------------|----------------------------------|
//! | `preallocate` | `fallocate(2)`      | `set_len` (or no-op if keep size) |
//! | `sync_range`  | `sync_file_range(2)`| `fdatasync(2)`                   |
//! | `unique_id_for` | `FS_IOC_GETVERSION` | `None`                         |

use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use tracing::{debug, warn};

use crate::config::FALLBACK_OS_PAGE_SIZE;

static FALLOCATE_SUPPORTED: AtomicBool = AtomicBool::new(true);
static SYNC_RANGE_SUPPORTED: AtomicBool = AtomicBool::new(true);

/// Access pattern hints forwarded to `posix_fadvise`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPattern {
    Normal,
    Random,
    Sequential,
    WillNeed,
    DontNeed,
}

impl AccessPattern {
    fn advice(self) -> libc::c_int {
        match self {
            AccessPattern::Normal => libc::POSIX_FADV_NORMAL,
            AccessPattern::Random => libc::POSIX_FADV_RANDOM,
            AccessPattern::Sequential => libc::POSIX_FADV_SEQUENTIAL,
            AccessPattern::WillNeed => libc::POSIX_FADV_WILLNEED,
            AccessPattern::DontNeed => libc::POSIX_FADV_DONTNEED,
        }
    }
}

pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: sysconf has no memory-safety preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            FALLBACK_OS_PAGE_SIZE
        }
    })
}

pub fn round_up(x: usize, y: usize) -> usize {
    x.div_ceil(y) * y
}

pub fn round_down(x: usize, y: usize) -> usize {
    (x / y) * y
}

fn is_unsupported(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EOPNOTSUPP) | Some(libc::ENOSYS))
}

pub fn fadvise(file: &File, offset: u64, len: u64, pattern: AccessPattern) -> io::Result<()> {
    // SAFETY: posix_fadvise only reads its integer arguments; the fd is
    // valid for the duration of the call because `file` is borrowed.
    let rc = unsafe {
        libc::posix_fadvise(
            file.as_raw_fd(),
            offset as libc::off_t,
            len as libc::off_t,
            pattern.advice(),
        )
    };

    // posix_fadvise returns the error number instead of setting errno
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Drops `[offset, offset + len)` from the page cache. Failures are logged
/// and swallowed; `len == 0` means "to the end of the file".
pub fn invalidate_cache(file: &File, path: &Path, offset: u64, len: u64) {
    if let Err(e) = fadvise(file, offset, len, AccessPattern::DontNeed) {
        warn!(
            path = %path.display(),
            offset,
            len,
            error = %e,
            "page cache invalidation failed"
        );
    }
}

/// Reserves disk space for `[offset, offset + len)`.
///
/// With `keep_size` the logical file size is untouched. Without it the file
/// grows to at least `offset + len`, which is what callers that mmap the
/// range rely on.
pub fn preallocate(file: &File, offset: u64, len: u64, keep_size: bool) -> io::Result<()> {
    if len == 0 {
        return Ok(());
    }

    if FALLOCATE_SUPPORTED.load(Ordering::Relaxed) {
        match fallocate(file, offset, len, keep_size) {
            Ok(()) => return Ok(()),
            Err(e) if is_unsupported(&e) => {
                FALLOCATE_SUPPORTED.store(false, Ordering::Relaxed);
                debug!(error = %e, "fallocate unsupported, falling back to set_len");
            }
            Err(e) => return Err(e),
        }
    }

    if keep_size {
        return Ok(());
    }

    let end = offset + len;
    if file.metadata()?.len() < end {
        file.set_len(end)?;
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn fallocate(file: &File, offset: u64, len: u64, keep_size: bool) -> io::Result<()> {
    let mode = if keep_size {
        libc::FALLOC_FL_KEEP_SIZE
    } else {
        0
    };

    loop {
        // SAFETY: fallocate only reads its integer arguments; the fd is valid
        // for the duration of the call because `file` is borrowed.
        let rc = unsafe {
            libc::fallocate(
                file.as_raw_fd(),
                mode,
                offset as libc::off_t,
                len as libc::off_t,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn fallocate(_file: &File, _offset: u64, _len: u64, _keep_size: bool) -> io::Result<()> {
    Err(io::Error::from_raw_os_error(libc::ENOSYS))
}

/// Starts writeback of `[offset, offset + nbytes)` without waiting for
/// metadata. Falls back to `fdatasync` of the whole file.
pub fn sync_range(file: &File, offset: u64, nbytes: u64) -> io::Result<()> {
    if SYNC_RANGE_SUPPORTED.load(Ordering::Relaxed) {
        match sync_file_range(file, offset, nbytes) {
            Ok(()) => return Ok(()),
            Err(e) if is_unsupported(&e) => {
                SYNC_RANGE_SUPPORTED.store(false, Ordering::Relaxed);
                debug!(error = %e, "sync_file_range unsupported, falling back to fdatasync");
            }
            Err(e) => return Err(e),
        }
    }
    file.sync_data()
}

#[cfg(target_os = "linux")]
fn sync_file_range(file: &File, offset: u64, nbytes: u64) -> io::Result<()> {
    // SAFETY: sync_file_range only reads its integer arguments; the fd is
    // valid for the duration of the call because `file` is borrowed.
    let rc = unsafe {
        libc::sync_file_range(
            file.as_raw_fd(),
            offset as libc::off64_t,
            nbytes as libc::off64_t,
            libc::SYNC_FILE_RANGE_WRITE,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn sync_file_range(_file: &File, _offset: u64, _nbytes: u64) -> io::Result<()> {
    Err(io::Error::from_raw_os_error(libc::ENOSYS))
}

/// `_IOR('v', 1, long)`
#[cfg(target_os = "linux")]
const FS_IOC_GETVERSION: u64 = (2 << 30)
    | ((std::mem::size_of::<libc::c_long>() as u64) << 16)
    | ((b'v' as u64) << 8)
    | 1;

#[cfg(target_os = "linux")]
fn inode_generation(file: &File) -> Option<u64> {
    let mut version: libc::c_long = 0;

    // SAFETY: FS_IOC_GETVERSION writes exactly one c_long into `version`,
    // which lives on the stack for the duration of the call.
    let rc = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            FS_IOC_GETVERSION as _,
            &mut version as *mut libc::c_long,
        )
    };
    (rc == 0).then_some(version as u64)
}

#[cfg(not(target_os = "linux"))]
fn inode_generation(_file: &File) -> Option<u64> {
    None
}

fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Identity of the file behind `file`: device, inode and inode generation,
/// each LEB128-encoded. `None` when the filesystem does not expose a
/// generation number, since device + inode alone can be reused.
pub fn unique_id_for(file: &File) -> Option<Vec<u8>> {
    let metadata = file.metadata().ok()?;
    let generation = inode_generation(file)?;

    let mut id = Vec::with_capacity(30);
    encode_varint(metadata.dev(), &mut id);
    encode_varint(metadata.ino(), &mut id);
    encode_varint(generation, &mut id);
    Some(id)
}

/// Closes the descriptor and reports the result of `close(2)`, which
/// dropping a `File` would discard.
pub fn close_file(file: File) -> io::Result<()> {
    use std::os::fd::IntoRawFd;

    let fd = file.into_raw_fd();
    // SAFETY: `fd` was just released from an owned File, so nothing else
    // closes it.
    let rc = unsafe { libc::close(fd) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
