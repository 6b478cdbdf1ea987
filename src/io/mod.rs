//! # File Primitives
//!
//! Descriptor-level file types a filesystem layer composes on top of the
//! device. They work purely in byte-offset space; which physical pages back
//! a file is decided elsewhere with [`Device`](crate::device::Device).
//!
//! ## Opening Files
//!
//! The `open_*` functions pick the concrete type from [`FileOptions`]:
//!
//! ```text
//! open_sequential     ──> SequentialFile
//! open_random_access  ──> AnyRandomReader::File | ::Mmap   (use_mmap_reads)
//! open_writable       ──> AnyWriter::Buffered   | ::Mmap   (use_mmap_writes)
//! open_random_rw      ──> RandomRwFile
//! open_directory      ──> Directory
//! lock_file           ──> FileLock
//! ```
//!
//! ## Error Handling
//!
//! Every failure carries the path and the operation. Durability failures
//! are raised as `NvmError::Sync`; cache invalidation never fails.
//!
//! ## Threading
//!
//! Writers are `Send` and owned by one thread at a time. Readers implement
//! `RandomReader: Send + Sync` and can be shared, including while a writer
//! appends to the same file through another descriptor.

mod buffered;
mod dir;
mod mmap_writer;
mod random_rw;
mod rate_limiter;
mod readers;
mod region;
mod sys;
mod traits;

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{Result, WrapErr};
use tracing::debug;

use crate::config::FileOptions;

pub use buffered::BufferedWriter;
pub use dir::{Directory, FileLock};
pub use mmap_writer::MmapWriter;
pub use random_rw::RandomRwFile;
pub use rate_limiter::{RateLimiter, TokenBucket};
pub use readers::{MmapReadableFile, RandomAccessFile, SequentialFile};
pub use region::MappedRegion;
pub use sys::{fadvise, page_size, preallocate, sync_range, unique_id_for, AccessPattern};
pub use traits::{
    AnyRandomReader, AnyWriter, Preallocatable, RandomReader, SequentialReader, Syncable, Writer,
};

pub fn open_sequential<P: AsRef<Path>>(path: P, options: &FileOptions) -> Result<SequentialFile> {
    let path = path.as_ref();

    let file = File::open(path)
        .wrap_err_with(|| format!("failed to open '{}' for reading", path.display()))?;

    Ok(SequentialFile::new(path, file, options))
}

pub fn open_random_access<P: AsRef<Path>>(
    path: P,
    options: &FileOptions,
) -> Result<AnyRandomReader> {
    let path = path.as_ref();

    let file = File::open(path)
        .wrap_err_with(|| format!("failed to open '{}' for reading", path.display()))?;

    if options.use_mmap_reads {
        debug!(path = %path.display(), "opening mmap reader");
        return Ok(AnyRandomReader::Mmap(MmapReadableFile::new(path, file)?));
    }
    Ok(AnyRandomReader::File(RandomAccessFile::new(path, file, options)))
}

/// Creates or truncates `path` and wraps it in the writer `options` select.
pub fn open_writable<P: AsRef<Path>>(path: P, options: &FileOptions) -> Result<AnyWriter> {
    let path = path.as_ref();

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .wrap_err_with(|| format!("failed to create '{}'", path.display()))?;

    debug!(
        path = %path.display(),
        mmap = options.use_mmap_writes,
        "opening writer"
    );

    if options.use_mmap_writes {
        return Ok(AnyWriter::Mmap(MmapWriter::new(path, file, options)?));
    }
    Ok(AnyWriter::Buffered(BufferedWriter::new(path, file, options)?))
}

/// Opens `path` for positioned reads and writes, creating it if missing.
pub fn open_random_rw<P: AsRef<Path>>(path: P, options: &FileOptions) -> Result<RandomRwFile> {
    let path = path.as_ref();

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .wrap_err_with(|| format!("failed to open '{}' for read/write", path.display()))?;

    Ok(RandomRwFile::new(path, file, options))
}

pub fn open_directory<P: AsRef<Path>>(path: P) -> Result<Directory> {
    Directory::open(path)
}

pub fn lock_file<P: AsRef<Path>>(path: P) -> Result<FileLock> {
    FileLock::acquire(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_writable_selects_writer_from_options() {
        let dir = tempdir().unwrap();

        let buffered = open_writable(dir.path().join("a"), &FileOptions::default()).unwrap();
        let mmap = open_writable(
            dir.path().join("b"),
            &FileOptions::default().use_mmap_writes(true),
        )
        .unwrap();

        assert!(!buffered.is_mmap());
        assert!(buffered.as_buffered().is_some());
        assert!(mmap.is_mmap());
        assert!(mmap.as_mmap().is_some());
    }

    #[test]
    fn open_writable_truncates_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old");
        std::fs::write(&path, b"stale contents").unwrap();

        let mut w = open_writable(&path, &FileOptions::default().use_mmap_writes(true)).unwrap();
        w.append(b"new").unwrap();
        w.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn open_random_access_selects_reader_from_options() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("r");
        std::fs::write(&path, b"payload").unwrap();

        let plain = open_random_access(&path, &FileOptions::default()).unwrap();
        let mapped =
            open_random_access(&path, &FileOptions::default().use_mmap_reads(true)).unwrap();

        let mut a = [0u8; 7];
        let mut b = [0u8; 7];
        plain.read_at(0, &mut a).unwrap();
        mapped.read_at(0, &mut b).unwrap();

        assert!(!plain.is_mmap());
        assert!(mapped.is_mmap());
        assert_eq!(a, b);
    }

    #[test]
    fn open_sequential_missing_file_names_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope");

        let err = open_sequential(&path, &FileOptions::default()).unwrap_err();

        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn random_readers_differ_only_past_end_of_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("eof");
        std::fs::write(&path, b"0123456789").unwrap();

        let plain = open_random_access(&path, &FileOptions::default()).unwrap();
        let mapped =
            open_random_access(&path, &FileOptions::default().use_mmap_reads(true)).unwrap();
        let mut buf = [0u8; 8];

        assert_eq!(plain.read_at(6, &mut buf).unwrap(), 4);
        assert_eq!(mapped.read_at(6, &mut buf).unwrap(), 4);
        assert_eq!(mapped.read_at(10, &mut buf).unwrap(), 0);

        assert_eq!(plain.read_at(11, &mut buf).unwrap(), 0);
        assert!(mapped.read_at(11, &mut buf).is_err());
    }

    #[test]
    fn open_random_rw_keeps_existing_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rw");
        std::fs::write(&path, b"keep").unwrap();

        let f = open_random_rw(&path, &FileOptions::default()).unwrap();
        let mut buf = [0u8; 4];

        assert_eq!(f.read(0, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"keep");
    }

    #[test]
    fn lock_and_directory_factories() {
        let dir = tempdir().unwrap();

        let lock = lock_file(dir.path().join("LOCK")).unwrap();
        let handle = open_directory(dir.path()).unwrap();

        handle.fsync().unwrap();
        assert!(lock.path().ends_with("LOCK"));
    }
}
