//! RAM Disk Driver
//!
//! An in-memory [`BlockDevice`] for bring-up and testing.
//!
//! # Features
//! - Heap-backed store shared between handles, so a PIO and a DMA view of
//!   the same medium can be mounted together
//! - Per-handle transfer counters
//! - Data survives unmount/remount for as long as any handle lives

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use log::debug;
use spin::Mutex;

use super::block::{check_range, BlockDevice, BlockStats, BlockStatus, SECTOR_SHIFT};

/// Default RAM disk size (4MB)
pub const DEFAULT_RAMDISK_SIZE: usize = 4 * 1024 * 1024;

/// A handle onto a RAM-backed medium
pub struct RamDisk {
    storage: Arc<Mutex<Vec<u8>>>,
    l_block_size: u8,
    sector_count: u64,
    ready: bool,
    stats: Arc<BlockStats>,
}

impl RamDisk {
    /// Create a zeroed disk of `size` bytes, rounded down to whole sectors
    pub fn new(size: usize) -> Self {
        Self::with_block_size(size, SECTOR_SHIFT)
    }

    pub fn with_block_size(size: usize, l_block_size: u8) -> Self {
        let sector_count = (size >> l_block_size) as u64;
        Self {
            storage: Arc::new(Mutex::new(vec![0u8; (sector_count as usize) << l_block_size])),
            l_block_size,
            sector_count,
            ready: false,
            stats: Arc::new(BlockStats::new()),
        }
    }

    /// Another handle onto the same medium, with its own counters
    pub fn share(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            l_block_size: self.l_block_size,
            sector_count: self.sector_count,
            ready: false,
            stats: Arc::new(BlockStats::new()),
        }
    }

    /// Counters for this handle
    pub fn stats(&self) -> Arc<BlockStats> {
        Arc::clone(&self.stats)
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        (self.sector_count as usize) << self.l_block_size
    }

    /// Copy raw bytes into the medium, bypassing the block interface
    pub fn load(&self, offset: usize, data: &[u8]) -> Result<(), BlockStatus> {
        let mut storage = self.storage.lock();
        let end = offset.checked_add(data.len()).ok_or(BlockStatus::Overflow)?;
        let dst = storage.get_mut(offset..end).ok_or(BlockStatus::Overflow)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    /// Copy raw bytes out of the medium
    pub fn peek(&self, offset: usize, out: &mut [u8]) -> Result<(), BlockStatus> {
        let storage = self.storage.lock();
        let end = offset.checked_add(out.len()).ok_or(BlockStatus::Overflow)?;
        let src = storage.get(offset..end).ok_or(BlockStatus::Overflow)?;
        out.copy_from_slice(src);
        Ok(())
    }

    fn fail(&self, status: BlockStatus) -> BlockStatus {
        BlockStats::bump(&self.stats.errors, 1);
        status
    }
}

impl BlockDevice for RamDisk {
    fn init(&mut self) -> Result<(), BlockStatus> {
        if self.sector_count == 0 {
            return Err(BlockStatus::NoMedia);
        }
        self.ready = true;
        BlockStats::bump(&self.stats.inits, 1);
        debug!("ramdisk: ready, {} KB", self.size() / 1024);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), BlockStatus> {
        self.ready = false;
        BlockStats::bump(&self.stats.shutdowns, 1);
        Ok(())
    }

    fn read_blocks(&mut self, block: u64, count: usize, buf: &mut [u8]) -> Result<(), BlockStatus> {
        if !self.ready {
            return Err(self.fail(BlockStatus::NotReady));
        }
        let bytes = check_range(block, count, self.sector_count, self.l_block_size, buf.len())
            .map_err(|e| self.fail(e))?;
        let offset = (block as usize) << self.l_block_size;

        let storage = self.storage.lock();
        buf[..bytes].copy_from_slice(&storage[offset..offset + bytes]);

        BlockStats::bump(&self.stats.reads, 1);
        BlockStats::bump(&self.stats.sectors_read, count as u64);
        Ok(())
    }

    fn write_blocks(&mut self, block: u64, count: usize, buf: &[u8]) -> Result<(), BlockStatus> {
        if !self.ready {
            return Err(self.fail(BlockStatus::NotReady));
        }
        let bytes = check_range(block, count, self.sector_count, self.l_block_size, buf.len())
            .map_err(|e| self.fail(e))?;
        let offset = (block as usize) << self.l_block_size;

        let mut storage = self.storage.lock();
        storage[offset..offset + bytes].copy_from_slice(&buf[..bytes]);

        BlockStats::bump(&self.stats.writes, 1);
        BlockStats::bump(&self.stats.sectors_written, count as u64);
        Ok(())
    }

    fn count_blocks(&self) -> u64 {
        self.sector_count
    }

    fn flush(&mut self) -> Result<(), BlockStatus> {
        BlockStats::bump(&self.stats.flushes, 1);
        Ok(())
    }

    fn l_block_size(&self) -> u8 {
        self.l_block_size
    }
}

// ============================================================================
// Tests
// ============================================================================
