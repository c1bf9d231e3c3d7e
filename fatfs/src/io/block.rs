//! Block Device Abstraction Layer
//!
//! A mounted volume talks to storage through devices implementing
//! [`BlockDevice`]. Blocks are fixed-size, `1 << l_block_size()` bytes
//! (512 for every device shipped with this crate).
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    FAT Engine / Adapter                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Disk Router                             │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────┐            │
//! │  │     PIO     │ │     DMA     │ │   Scratch   │            │
//! │  └─────────────┘ └─────────────┘ └─────────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │   SD / SPI      │ │    ATA/IDE      │ │    RAM disk     │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//! ```

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::fs::engine::DResult;
use crate::fs::errno::Errno;

/// Default sector size
pub const SECTOR_SIZE: usize = 512;

/// log2 of [`SECTOR_SIZE`]
pub const SECTOR_SHIFT: u8 = 9;

/// Block device failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockStatus {
    /// Device not found
    NotFound = 1,
    /// I/O error
    IoError = 2,
    /// Invalid parameter
    InvalidParameter = 3,
    /// Device busy
    Busy = 4,
    /// Media not present
    NoMedia = 5,
    /// Write protected
    WriteProtected = 6,
    /// Timeout
    Timeout = 7,
    /// Not ready
    NotReady = 8,
    /// Bad sector
    BadSector = 9,
    /// Request runs past the end of the device
    Overflow = 10,
}

impl BlockStatus {
    /// Error number recorded when a transfer fails with this status
    pub const fn errno(self) -> Errno {
        match self {
            Self::Overflow => Errno::EOVERFLOW,
            _ => Errno::EIO,
        }
    }

    /// Disk callback result reported to the engine
    pub const fn dresult(self) -> DResult {
        match self {
            Self::Overflow => DResult::ParErr,
            _ => DResult::Error,
        }
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NotFound => "device not found",
            Self::IoError => "I/O error",
            Self::InvalidParameter => "invalid parameter",
            Self::Busy => "device busy",
            Self::NoMedia => "no media",
            Self::WriteProtected => "write protected",
            Self::Timeout => "timeout",
            Self::NotReady => "not ready",
            Self::BadSector => "bad sector",
            Self::Overflow => "out of range",
        };
        f.write_str(msg)
    }
}

/// A block device as seen by the disk router
pub trait BlockDevice: Send {
    /// Bring the device up. Called at mount and again on engine request.
    fn init(&mut self) -> Result<(), BlockStatus>;
    fn shutdown(&mut self) -> Result<(), BlockStatus>;
    /// Read `count` blocks starting at `block` into the front of `buf`
    fn read_blocks(&mut self, block: u64, count: usize, buf: &mut [u8]) -> Result<(), BlockStatus>;
    /// Write `count` blocks starting at `block` from the front of `buf`
    fn write_blocks(&mut self, block: u64, count: usize, buf: &[u8]) -> Result<(), BlockStatus>;
    /// Number of blocks on the device
    fn count_blocks(&self) -> u64;
    fn flush(&mut self) -> Result<(), BlockStatus>;
    /// log2 of the block size in bytes
    fn l_block_size(&self) -> u8 {
        SECTOR_SHIFT
    }
}

impl<D: BlockDevice + ?Sized> BlockDevice for alloc::boxed::Box<D> {
    fn init(&mut self) -> Result<(), BlockStatus> {
        (**self).init()
    }
    fn shutdown(&mut self) -> Result<(), BlockStatus> {
        (**self).shutdown()
    }
    fn read_blocks(&mut self, block: u64, count: usize, buf: &mut [u8]) -> Result<(), BlockStatus> {
        (**self).read_blocks(block, count, buf)
    }
    fn write_blocks(&mut self, block: u64, count: usize, buf: &[u8]) -> Result<(), BlockStatus> {
        (**self).write_blocks(block, count, buf)
    }
    fn count_blocks(&self) -> u64 {
        (**self).count_blocks()
    }
    fn flush(&mut self) -> Result<(), BlockStatus> {
        (**self).flush()
    }
    fn l_block_size(&self) -> u8 {
        (**self).l_block_size()
    }
}

/// Validate a transfer of `count` blocks at `block` against a device of
/// `total` blocks and a buffer of `buf_len` bytes
pub fn check_range(
    block: u64,
    count: usize,
    total: u64,
    l_block_size: u8,
    buf_len: usize,
) -> Result<usize, BlockStatus> {
    let end = block
        .checked_add(count as u64)
        .ok_or(BlockStatus::Overflow)?;
    if end > total {
        return Err(BlockStatus::Overflow);
    }
    let bytes = count << l_block_size;
    if buf_len < bytes {
        return Err(BlockStatus::InvalidParameter);
    }
    Ok(bytes)
}

/// Per-device transfer counters
#[derive(Debug, Default)]
pub struct BlockStats {
    /// Read requests
    pub reads: AtomicU64,
    /// Write requests
    pub writes: AtomicU64,
    /// Blocks read
    pub sectors_read: AtomicU64,
    /// Blocks written
    pub sectors_written: AtomicU64,
    /// Successful init calls
    pub inits: AtomicU64,
    /// Shutdown calls
    pub shutdowns: AtomicU64,
    /// Flush calls
    pub flushes: AtomicU64,
    /// Failed requests
    pub errors: AtomicU64,
}

impl BlockStats {
    pub const fn new() -> Self {
        Self {
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            sectors_read: AtomicU64::new(0),
            sectors_written: AtomicU64::new(0),
            inits: AtomicU64::new(0),
            shutdowns: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(BlockStatus::Overflow.dresult(), DResult::ParErr);
        assert_eq!(BlockStatus::Overflow.errno(), Errno::EOVERFLOW);
        assert_eq!(BlockStatus::Timeout.dresult(), DResult::Error);
        assert_eq!(BlockStatus::IoError.errno(), Errno::EIO);
    }

    #[test]
    fn test_check_range() {
        assert_eq!(check_range(0, 2, 8, SECTOR_SHIFT, 1024), Ok(1024));
        assert_eq!(check_range(7, 2, 8, SECTOR_SHIFT, 1024), Err(BlockStatus::Overflow));
        assert_eq!(check_range(u64::MAX, 1, 8, SECTOR_SHIFT, 512), Err(BlockStatus::Overflow));
        assert_eq!(
            check_range(0, 2, 8, SECTOR_SHIFT, 600),
            Err(BlockStatus::InvalidParameter)
        );
    }
}
