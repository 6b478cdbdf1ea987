//! # Directories and Lock Files
//!
//! `Directory` holds a directory descriptor so that renames and file
//! creations inside it can be made durable with `fsync`.
//!
//! `FileLock` is an exclusive POSIX record lock (`fcntl(F_SETLK)`) on a lock
//! file. POSIX locks belong to the process, so a second lock of the same file
//! from this process would silently succeed at the kernel level. The set of
//! paths locked by this process is therefore tracked here as well, and a
//! second `lock_file` on the same path fails until the first lock is dropped.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use eyre::{bail, Result, WrapErr};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::NvmError;

static LOCKED_FILES: Mutex<BTreeSet<PathBuf>> = Mutex::new(BTreeSet::new());

#[derive(Debug)]
pub struct Directory {
    path: PathBuf,
    file: File,
}

impl Directory {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = File::open(path)
            .wrap_err_with(|| format!("failed to open directory '{}'", path.display()))?;

        let metadata = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?;
        if !metadata.is_dir() {
            bail!("'{}' is not a directory", path.display());
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fsync(&self) -> Result<()> {
        self.file.sync_all().wrap_err_with(|| NvmError::Sync {
            path: self.path.clone(),
        })
    }
}

#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: File,
}

fn set_lock(file: &File, lock_type: libc::c_int) -> io::Result<()> {
    // SAFETY: flock is a plain C struct for which all-zero is a valid value.
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = lock_type as _;
    fl.l_whence = libc::SEEK_SET as _;
    fl.l_start = 0;
    fl.l_len = 0;

    // SAFETY: `fl` outlives the call and the fd is valid because `file` is
    // borrowed.
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &fl as *const libc::flock) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl FileLock {
    /// Creates `path` if needed and takes an exclusive lock on the whole file.
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        {
            let mut locked = LOCKED_FILES.lock();
            if !locked.insert(path.clone()) {
                bail!("lock file '{}' is already held by this process", path.display());
            }
        }

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .wrap_err_with(|| format!("failed to open lock file '{}'", path.display()))
            .and_then(|file| {
                set_lock(&file, libc::F_WRLCK)
                    .wrap_err_with(|| format!("failed to lock '{}'", path.display()))?;
                Ok(file)
            });

        match lock {
            Ok(file) => {
                debug!(path = %path.display(), "file lock acquired");
                Ok(Self { path, file })
            }
            Err(e) => {
                LOCKED_FILES.lock().remove(&path);
                Err(e)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = set_lock(&self.file, libc::F_UNLCK) {
            warn!(path = %self.path.display(), error = %e, "failed to release file lock");
        }
        LOCKED_FILES.lock().remove(&self.path);
    }
}
