//! Positioned read/write file. Reads and writes are independent operations
//! at explicit offsets; callers serialize them when ordering matters.

use std::fs::File;
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use eyre::{bail, Result, WrapErr};
use tracing::warn;

use super::sys;
use super::traits::{Preallocatable, Syncable};
use crate::config::FileOptions;
use crate::error::NvmError;

#[derive(Debug)]
pub struct RandomRwFile {
    path: PathBuf,
    file: Option<File>,
    pending_sync: bool,
    pending_fsync: bool,
    fallocate_with_keep_size: bool,
}

impl RandomRwFile {
    pub fn new<P: AsRef<Path>>(path: P, file: File, options: &FileOptions) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Some(file),
            pending_sync: false,
            pending_fsync: false,
            fallocate_with_keep_size: options.fallocate_with_keep_size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&self) -> Result<&File> {
        match self.file.as_ref() {
            Some(file) => Ok(file),
            None => bail!("'{}' is already closed", self.path.display()),
        }
    }

    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file()?.write_all_at(data, offset).wrap_err_with(|| {
            format!(
                "failed to write {} bytes at offset {} to '{}'",
                data.len(),
                offset,
                self.path.display()
            )
        })?;
        self.pending_sync = true;
        self.pending_fsync = true;
        Ok(())
    }

    /// Fills `buf` from `offset`, stopping early only at end of file.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let file = self.file()?;
        let mut filled = 0;

        while filled < buf.len() {
            match file.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).wrap_err_with(|| {
                        format!(
                            "failed to read {} bytes at offset {} from '{}'",
                            buf.len(),
                            offset,
                            self.path.display()
                        )
                    })
                }
            }
        }
        Ok(filled)
    }

    pub fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            sys::close_file(file)
                .wrap_err_with(|| format!("failed to close '{}'", self.path.display()))?;
        }
        Ok(())
    }
}

impl Syncable for RandomRwFile {
    fn sync(&mut self) -> Result<()> {
        if !self.pending_sync {
            return Ok(());
        }
        self.file()?.sync_data().wrap_err_with(|| NvmError::Sync {
            path: self.path.clone(),
        })?;
        self.pending_sync = false;
        Ok(())
    }

    fn fsync(&mut self) -> Result<()> {
        if !self.pending_fsync {
            return Ok(());
        }
        self.file()?.sync_all().wrap_err_with(|| NvmError::Sync {
            path: self.path.clone(),
        })?;
        self.pending_sync = false;
        self.pending_fsync = false;
        Ok(())
    }
}

impl Preallocatable for RandomRwFile {
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

impl Drop for RandomRwFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "close on drop failed");
        }
    }
}
