//! # File Capability Traits
//!
//! Each file type implements the roles it supports instead of one wide
//! interface with "not supported" defaults:
//!
//! | Type               | SequentialReader | RandomReader | Writer | Syncable | Preallocatable |
//! |--------------------|:---:|:---:|:---:|:---:|:---:|
//! | `SequentialFile`   |  x  |     |     |     |     |
//! | `RandomAccessFile` |     |  x  |     |     |     |
//! | `MmapReadableFile` |     |  x  |     |     |     |
//! | `BufferedWriter`   |     |     |  x  |  x  |  x  |
//! | `MmapWriter`       |     |     |  x  |  x  |  x  |
//! | `RandomRwFile`     |     |     |     |  x  |  x  |
//!
//! ## AnyWriter / AnyRandomReader
//!
//! The factory functions pick the concrete type from `FileOptions` at
//! runtime. `AnyWriter` and `AnyRandomReader` wrap the candidates in an enum
//! and forward every call with a `match`, so callers hold one concrete type
//! and dispatch stays static.

use eyre::Result;

use super::buffered::BufferedWriter;
use super::mmap_writer::MmapWriter;
use super::readers::{MmapReadableFile, RandomAccessFile};
use super::sys::AccessPattern;

pub trait SequentialReader {
    /// Reads up to `buf.len()` bytes. A short read means end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn skip(&mut self, n: u64) -> Result<()>;

    fn is_eof(&self) -> bool;

    /// Best effort; failures are logged, never returned.
    fn invalidate_cache(&self, offset: u64, len: u64) -> Result<()>;
}

pub trait RandomReader: Send + Sync {
    /// Reads up to `buf.len()` bytes at `offset`. A short read means the
    /// range crossed end of file.
    ///
    /// An `offset` past end of file is implementation defined:
    /// `RandomAccessFile` returns `Ok(0)` while `MmapReadableFile` returns an
    /// error.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    fn invalidate_cache(&self, offset: u64, len: u64) -> Result<()>;

    fn unique_id(&self) -> Option<Vec<u8>>;

    fn hint(&self, _pattern: AccessPattern) {}
}

pub trait Writer {
    fn append(&mut self, data: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    /// Logical size: every appended byte, buffered or not.
    fn file_size(&self) -> u64;

    fn invalidate_cache(&self, offset: u64, len: u64) -> Result<()>;

    fn unique_id(&self) -> Option<Vec<u8>> {
        None
    }
}

pub trait Syncable {
    fn sync(&mut self) -> Result<()>;

    fn fsync(&mut self) -> Result<()>;

    fn range_sync(&mut self, _offset: u64, _nbytes: u64) -> Result<()> {
        self.sync()
    }
}

pub trait Preallocatable {
    fn allocate(&mut self, offset: u64, len: u64) -> Result<()>;
}

#[derive(Debug)]
pub enum AnyWriter {
    Buffered(BufferedWriter),
    Mmap(MmapWriter),
}

impl AnyWriter {
    pub fn is_mmap(&self) -> bool {
        matches!(self, AnyWriter::Mmap(_))
    }

    pub fn as_mmap(&self) -> Option<&MmapWriter> {
        match self {
            AnyWriter::Mmap(w) => Some(w),
            AnyWriter::Buffered(_) => None,
        }
    }

    pub fn as_buffered(&self) -> Option<&BufferedWriter> {
        match self {
            AnyWriter::Buffered(w) => Some(w),
            AnyWriter::Mmap(_) => None,
        }
    }
}

impl Writer for AnyWriter {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        match self {
            AnyWriter::Buffered(w) => w.append(data),
            AnyWriter::Mmap(w) => w.append(data),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            AnyWriter::Buffered(w) => w.flush(),
            AnyWriter::Mmap(w) => w.flush(),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            AnyWriter::Buffered(w) => w.close(),
            AnyWriter::Mmap(w) => w.close(),
        }
    }

    fn file_size(&self) -> u64 {
        match self {
            AnyWriter::Buffered(w) => w.file_size(),
            AnyWriter::Mmap(w) => w.file_size(),
        }
    }

    fn invalidate_cache(&self, offset: u64, len: u64) -> Result<()> {
        match self {
            AnyWriter::Buffered(w) => w.invalidate_cache(offset, len),
            AnyWriter::Mmap(w) => w.invalidate_cache(offset, len),
        }
    }

    fn unique_id(&self) -> Option<Vec<u8>> {
        match self {
            AnyWriter::Buffered(w) => w.unique_id(),
            AnyWriter::Mmap(w) => w.unique_id(),
        }
    }
}

impl Syncable for AnyWriter {
    fn sync(&mut self) -> Result<()> {
        match self {
            AnyWriter::Buffered(w) => w.sync(),
            AnyWriter::Mmap(w) => w.sync(),
        }
    }

    fn fsync(&mut self) -> Result<()> {
        match self {
            AnyWriter::Buffered(w) => w.fsync(),
            AnyWriter::Mmap(w) => w.fsync(),
        }
    }

    fn range_sync(&mut self, offset: u64, nbytes: u64) -> Result<()> {
        match self {
            AnyWriter::Buffered(w) => w.range_sync(offset, nbytes),
            AnyWriter::Mmap(w) => w.range_sync(offset, nbytes),
        }
    }
}

impl Preallocatable for AnyWriter {
    fn allocate(&mut self, offset: u64, len: u64) -> Result<()> {
        match self {
            AnyWriter::Buffered(w) => w.allocate(offset, len),
            AnyWriter::Mmap(w) => w.allocate(offset, len),
        }
    }
}

#[derive(Debug)]
pub enum AnyRandomReader {
    File(RandomAccessFile),
    Mmap(MmapReadableFile),
}

impl AnyRandomReader {
    pub fn is_mmap(&self) -> bool {
        matches!(self, AnyRandomReader::Mmap(_))
    }
}

impl RandomReader for AnyRandomReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        match self {
            AnyRandomReader::File(r) => r.read_at(offset, buf),
            AnyRandomReader::Mmap(r) => r.read_at(offset, buf),
        }
    }

    fn invalidate_cache(&self, offset: u64, len: u64) -> Result<()> {
        match self {
            AnyRandomReader::File(r) => r.invalidate_cache(offset, len),
            AnyRandomReader::Mmap(r) => r.invalidate_cache(offset, len),
        }
    }

    fn unique_id(&self) -> Option<Vec<u8>> {
        match self {
            AnyRandomReader::File(r) => r.unique_id(),
            AnyRandomReader::Mmap(r) => r.unique_id(),
        }
    }

    fn hint(&self, pattern: AccessPattern) {
        match self {
            AnyRandomReader::File(r) => r.hint(pattern),
            AnyRandomReader::Mmap(r) => r.hint(pattern),
        }
    }
}
