//! # nvmstore Configuration Constants
//!
//! Numeric defaults for the page allocator and the file primitives. Values
//! that depend on each other are grouped together and the relationships are
//! enforced with compile-time assertions.
//!
//! ## Dependency Graph
//!
//! ```text
//! FALLBACK_OS_PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> DEFAULT_MMAP_INCREMENT (must be a multiple)
//!       │     Each mmap window starts at a file offset that is a multiple
//!       │     of the increment, and mmap offsets must be page aligned.
//!       │
//!       └─> DEFAULT_WRITE_BUFFER_SIZE (multiple, so buffered flushes
//!             land on page boundaries)
//!
//! DEFAULT_BYTES_PER_SYNC (0 = every explicit sync hits the disk)
//!       │
//!       └─> Non-zero values defer sync()/fsync() until at least this many
//!           bytes were appended since the previous durable point
//!
//! MIN_RATE_LIMITER_REFILL_US
//!       │
//!       └─> Lower bound for TokenBucket refill periods; shorter periods
//!           turn the limiter into a busy loop of tiny grants
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `DEFAULT_MMAP_INCREMENT % FALLBACK_OS_PAGE_SIZE == 0`
//! 2. `DEFAULT_WRITE_BUFFER_SIZE % FALLBACK_OS_PAGE_SIZE == 0`
//! 3. `INLINE_PAGE_SIZES >= 1` (every page supports at least one transfer size)
//!
//! The real OS page size is queried at runtime (`io::page_size()`); the
//! fallback is only used when `sysconf` cannot answer.

// ============================================================================
// DEVICE CONFIGURATION
// ============================================================================

/// Default path of the Open-Channel character device.
pub const DEFAULT_NVM_DEVICE: &str = "/dev/nvm0";

/// Number of transfer sizes a page stores inline before spilling to the heap.
/// Open-Channel devices typically advertise one to three sizes per page.
pub const INLINE_PAGE_SIZES: usize = 4;

const _: () = assert!(
    INLINE_PAGE_SIZES >= 1,
    "a page must be able to hold at least one transfer size inline"
);

// ============================================================================
// WRITER CONFIGURATION
// ============================================================================

/// Page size assumed when `sysconf(_SC_PAGESIZE)` fails.
pub const FALLBACK_OS_PAGE_SIZE: usize = 4096;

/// Capacity of the buffered append writer (64KB).
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Size of each mapping window of the growable mmap writer (64KB).
/// Rounded up to the OS page size at construction.
pub const DEFAULT_MMAP_INCREMENT: usize = 64 * 1024;

/// Sync cadence in bytes. 0 disables deferral.
pub const DEFAULT_BYTES_PER_SYNC: u64 = 0;

const _: () = assert!(
    DEFAULT_MMAP_INCREMENT % FALLBACK_OS_PAGE_SIZE == 0,
    "DEFAULT_MMAP_INCREMENT must be page aligned"
);

const _: () = assert!(
    DEFAULT_WRITE_BUFFER_SIZE % FALLBACK_OS_PAGE_SIZE == 0,
    "DEFAULT_WRITE_BUFFER_SIZE must be page aligned"
);

// ============================================================================
// RATE LIMITER CONFIGURATION
// ============================================================================

/// Default refill period of the token bucket (100ms).
pub const DEFAULT_RATE_LIMITER_REFILL_US: u64 = 100 * 1000;

/// Shortest refill period accepted by the token bucket (1ms).
pub const MIN_RATE_LIMITER_REFILL_US: u64 = 1000;

const _: () = assert!(
    DEFAULT_RATE_LIMITER_REFILL_US >= MIN_RATE_LIMITER_REFILL_US,
    "default refill period must respect the minimum"
);
