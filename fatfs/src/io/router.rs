//! Disk Router
//!
//! One router per mounted volume. It answers the engine's disk callbacks
//! and picks the transfer path for every request:
//!
//! ```text
//!   count > 1 and a DMA device?
//!     ├─ buffer 32-byte aligned ............ DMA straight into the buffer
//!     ├─ fits the cluster scratch buffer ... DMA into scratch, then copy
//!     └─ otherwise ......................... PIO
//!   single sector, or no DMA device ........ PIO
//! ```
//!
//! Writes take the PIO path unless [`FsConfig::dma_write`] is set.
//!
//! [`FsConfig::dma_write`]: crate::config::FsConfig::dma_write

use alloc::boxed::Box;
use core::fmt;

use log::{debug, trace, warn};

use super::block::{BlockDevice, BlockStatus};
use super::dma::{is_dma_aligned, DmaBuffer};
use crate::fs::engine::{DResult, DStatus, DiskCmd};

/// Transfer path chosen for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoPath {
    Pio,
    /// DMA directly to or from the caller's buffer
    Dma,
    /// DMA through the per-mount scratch buffer
    Scratch,
}

impl fmt::Display for IoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pio => "pio",
            Self::Dma => "dma",
            Self::Scratch => "dma-buf",
        })
    }
}

/// Block devices and transfer state behind one logical drive
pub struct DiskRouter {
    drive: u8,
    pio: Box<dyn BlockDevice>,
    dma: Option<Box<dyn BlockDevice>>,
    scratch: Option<DmaBuffer>,
    stat: DStatus,
    /// Sectors per cluster, 0 until the engine has mounted the volume
    csize: u32,
    dma_write: bool,
}

impl DiskRouter {
    pub fn new(
        drive: u8,
        pio: Box<dyn BlockDevice>,
        dma: Option<Box<dyn BlockDevice>>,
        dma_write: bool,
    ) -> Self {
        Self {
            drive,
            pio,
            dma,
            scratch: None,
            stat: DStatus::empty(),
            csize: 0,
            dma_write,
        }
    }

    pub fn has_dma(&self) -> bool {
        self.dma.is_some()
    }

    pub fn has_scratch(&self) -> bool {
        self.scratch.is_some()
    }

    pub fn l_block_size(&self) -> u8 {
        self.pio.l_block_size()
    }

    pub fn block_size(&self) -> u32 {
        1 << self.l_block_size()
    }

    pub fn count_blocks(&self) -> u64 {
        self.pio.count_blocks()
    }

    pub fn set_cluster_sectors(&mut self, csize: u32) {
        self.csize = csize;
    }

    /// Allocate the cluster-sized scratch buffer. Only meaningful with a
    /// DMA device; returns whether a buffer is attached afterwards.
    pub fn attach_scratch(&mut self) -> bool {
        if self.dma.is_none() || self.scratch.is_some() {
            return self.scratch.is_some();
        }
        let len = (self.csize as usize) << self.l_block_size();
        self.scratch = DmaBuffer::try_new(len);
        if self.scratch.is_none() {
            warn!("FATFS: Can't allocate {} bytes DMA buffer", len);
        }
        self.scratch.is_some()
    }

    fn route(&self, buf: *const u8, count: u32, allow_dma: bool) -> IoPath {
        if !allow_dma || count <= 1 || self.dma.is_none() {
            return IoPath::Pio;
        }
        if is_dma_aligned(buf) {
            return IoPath::Dma;
        }
        match &self.scratch {
            Some(scratch)
                if count <= self.csize
                    && ((count as usize) << self.l_block_size()) <= scratch.len() =>
            {
                IoPath::Scratch
            }
            _ => IoPath::Pio,
        }
    }

    /// Path a read of `count` sectors into `buf` would take
    pub fn read_path(&self, buf: *const u8, count: u32) -> IoPath {
        self.route(buf, count, true)
    }

    /// Path a write of `count` sectors from `buf` would take
    pub fn write_path(&self, buf: *const u8, count: u32) -> IoPath {
        self.route(buf, count, self.dma_write)
    }

    fn transfer_len(&self, count: u32, buf_len: usize) -> Result<usize, BlockStatus> {
        let bytes = (count as usize) << self.l_block_size();
        if buf_len < bytes {
            return Err(BlockStatus::InvalidParameter);
        }
        Ok(bytes)
    }

    /// Re-initialise the devices; a failing DMA device marks the drive too
    pub fn initialize(&mut self) -> DStatus {
        match self.pio.init() {
            Ok(()) => self.stat.remove(DStatus::NOINIT),
            Err(_) => self.stat.insert(DStatus::NOINIT),
        }
        if let Some(dma) = self.dma.as_mut() {
            if dma.init().is_err() {
                self.stat.insert(DStatus::NOINIT);
            }
        }
        debug!("FATFS: disk_initialize[{}] 0x{:02x}", self.drive, self.stat.bits());
        self.stat
    }

    pub fn status(&self) -> DStatus {
        self.stat
    }

    pub fn read(&mut self, buf: &mut [u8], sector: u64, count: u32) -> Result<(), BlockStatus> {
        let bytes = self.transfer_len(count, buf.len())?;
        let path = self.read_path(buf.as_ptr(), count);
        trace!("FATFS: disk_read[{}] {} {} {}", self.drive, path, sector, count);

        let n = count as usize;
        match (path, self.dma.as_mut(), self.scratch.as_mut()) {
            (IoPath::Dma, Some(dma), _) => dma.read_blocks(sector, n, &mut buf[..bytes]),
            (IoPath::Scratch, Some(dma), Some(scratch)) => {
                dma.read_blocks(sector, n, &mut scratch.as_mut_slice()[..bytes])?;
                buf[..bytes].copy_from_slice(&scratch.as_slice()[..bytes]);
                Ok(())
            }
            _ => self.pio.read_blocks(sector, n, &mut buf[..bytes]),
        }
    }

    pub fn write(&mut self, buf: &[u8], sector: u64, count: u32) -> Result<(), BlockStatus> {
        let bytes = self.transfer_len(count, buf.len())?;
        let path = self.write_path(buf.as_ptr(), count);
        trace!("FATFS: disk_write[{}] {} {} {}", self.drive, path, sector, count);

        let n = count as usize;
        match (path, self.dma.as_mut(), self.scratch.as_mut()) {
            (IoPath::Dma, Some(dma), _) => dma.write_blocks(sector, n, &buf[..bytes]),
            (IoPath::Scratch, Some(dma), Some(scratch)) => {
                scratch.as_mut_slice()[..bytes].copy_from_slice(&buf[..bytes]);
                dma.write_blocks(sector, n, &scratch.as_slice()[..bytes])
            }
            _ => self.pio.write_blocks(sector, n, &buf[..bytes]),
        }
    }

    pub fn ioctl(&mut self, cmd: DiskCmd) -> Result<u64, DResult> {
        match cmd {
            DiskCmd::CTRL_SYNC => self.pio.flush().map(|()| 0).map_err(|_| DResult::Error),
            DiskCmd::GET_SECTOR_COUNT => Ok(self.pio.count_blocks()),
            DiskCmd::GET_SECTOR_SIZE | DiskCmd::GET_BLOCK_SIZE => Ok(self.block_size() as u64),
            DiskCmd::CTRL_TRIM => Ok(0),
            DiskCmd(code) => {
                debug!("FATFS: disk_ioctl[{}] unknown command {}", self.drive, code);
                Err(DResult::ParErr)
            }
        }
    }

    /// Shut down both devices and release the scratch buffer
    pub fn shutdown(&mut self) {
        if let Err(e) = self.pio.shutdown() {
            debug!("FATFS: drive {} shutdown: {}", self.drive, e);
        }
        if let Some(dma) = self.dma.as_mut() {
            if let Err(e) = dma.shutdown() {
                debug!("FATFS: drive {} DMA shutdown: {}", self.drive, e);
            }
        }
        self.scratch = None;
    }
}
