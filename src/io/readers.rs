//! # Readers
//!
//! - `SequentialFile`: forward-only reads through a userspace buffer.
//! - `RandomAccessFile`: positioned reads, safe to share across threads.
//! - `MmapReadableFile`: positioned reads served from a read-only mapping,
//!   plus zero-copy `slice()`.
//!
//! With `use_os_buffer = false` the plain readers drop every range they read
//! from the page cache, so a one-off scan does not evict hot data.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memmap2::Mmap;

use super::sys::{self, AccessPattern};
use super::traits::{RandomReader, SequentialReader};
use crate::config::FileOptions;

#[derive(Debug)]
pub struct SequentialFile {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    eof: bool,
    use_os_buffer: bool,
}

impl SequentialFile {
    pub fn new<P: AsRef<Path>>(path: P, file: File, options: &FileOptions) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            reader: BufReader::new(file),
            offset: 0,
            eof: false,
            use_os_buffer: options.use_os_buffer,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn position(&self) -> u64 {
        self.offset
    }
}

impl SequentialReader for SequentialFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;

        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).wrap_err_with(|| {
                        format!(
                            "failed to read {} bytes at offset {} from '{}'",
                            buf.len(),
                            self.offset,
                            self.path.display()
                        )
                    })
                }
            }
        }

        if !self.use_os_buffer && filled > 0 {
            sys::invalidate_cache(self.reader.get_ref(), &self.path, self.offset, filled as u64);
        }
        self.offset += filled as u64;
        Ok(filled)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        let delta = i64::try_from(n)
            .wrap_err_with(|| format!("skip of {} bytes does not fit a file offset", n))?;
        self.reader
            .seek_relative(delta)
            .wrap_err_with(|| format!("failed to skip {} bytes in '{}'", n, self.path.display()))?;
        self.offset += n;
        Ok(())
    }

    fn is_eof(&self) -> bool {
        self.eof
    }

    fn invalidate_cache(&self, offset: u64, len: u64) -> Result<()> {
        sys::invalidate_cache(self.reader.get_ref(), &self.path, offset, len);
        Ok(())
    }
}

#[derive(Debug)]
pub struct RandomAccessFile {
    path: PathBuf,
    file: File,
    use_os_buffer: bool,
}

impl RandomAccessFile {
    pub fn new<P: AsRef<Path>>(path: P, file: File, options: &FileOptions) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file,
            use_os_buffer: options.use_os_buffer,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RandomReader for RandomAccessFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;

        while filled < buf.len() {
            match self.file.read_at(&mut buf[filled..], offset + filled as u64) {
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

        if !self.use_os_buffer && filled > 0 {
            sys::invalidate_cache(&self.file, &self.path, offset, filled as u64);
        }
        Ok(filled)
    }

    fn invalidate_cache(&self, offset: u64, len: u64) -> Result<()> {
        sys::invalidate_cache(&self.file, &self.path, offset, len);
        Ok(())
    }

    fn unique_id(&self) -> Option<Vec<u8>> {
        sys::unique_id_for(&self.file)
    }

    fn hint(&self, pattern: AccessPattern) {
        // advisory only
        let _ = sys::fadvise(&self.file, 0, 0, pattern);
    }
}

#[derive(Debug)]
pub struct MmapReadableFile {
    path: PathBuf,
    file: File,
    /// `None` for an empty file; zero-length mappings are rejected by mmap.
    map: Option<Mmap>,
}

impl MmapReadableFile {
    pub fn new<P: AsRef<Path>>(path: P, file: File) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let len = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?
            .len();

        let map = if len == 0 {
            None
        } else {
            // SAFETY: Mmap::map is unsafe because the file may be truncated
            // or modified while mapped. This is safe because:
            // 1. Readers are opened on files that are no longer being written
            // 2. Every access is bounds-checked against the mapping length
            // 3. The mapping is dropped together with this reader
            let map = unsafe {
                Mmap::map(&file)
                    .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
            };
            Some(map)
        };

        Ok(Self { path, file, map })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.map.as_ref().map_or(0, |m| m.len() as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `n` bytes at `offset`, borrowed from the mapping. Shorter than
    /// `n` when the range crosses end of file.
    pub fn slice(&self, offset: u64, n: usize) -> Result<&[u8]> {
        let len = self.len();
        ensure!(
            offset <= len,
            "offset {} is past end of '{}' ({} bytes)",
            offset,
            self.path.display(),
            len
        );

        let Some(map) = self.map.as_ref() else {
            return Ok(&[]);
        };
        let start = offset as usize;
        let end = start.saturating_add(n).min(map.len());
        Ok(&map[start..end])
    }
}

impl RandomReader for MmapReadableFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let src = self.slice(offset, buf.len())?;
        buf[..src.len()].copy_from_slice(src);
        Ok(src.len())
    }

    fn invalidate_cache(&self, offset: u64, len: u64) -> Result<()> {
        sys::invalidate_cache(&self.file, &self.path, offset, len);
        Ok(())
    }

    fn unique_id(&self) -> Option<Vec<u8>> {
        sys::unique_id_for(&self.file)
    }

    fn hint(&self, pattern: AccessPattern) {
        let _ = sys::fadvise(&self.file, 0, 0, pattern);
    }
}
