//! Fault-Injecting Devices
//!
//! Wrappers that make a working device or registry fail on demand, and a
//! RAM-backed storage backend for the discovery wrappers.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::fs::errno::Errno;
use crate::fs::probe::{DeviceClass, StorageBackend};
use crate::fs::vfs::{NameRegistry, VfsHandler};
use crate::io::block::{BlockDevice, BlockStatus, SECTOR_SIZE};
use crate::io::ramdisk::RamDisk;

/// Switches shared between a [`FaultyDevice`] and the test driving it
#[derive(Debug, Default)]
pub struct Faults {
    pub fail_init: AtomicBool,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl Faults {
    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::Relaxed);
    }

    fn armed(flag: &AtomicBool) -> bool {
        flag.load(Ordering::Relaxed)
    }
}

/// A device that fails with [`BlockStatus::IoError`] while a fault is armed
pub struct FaultyDevice<D> {
    inner: D,
    faults: Arc<Faults>,
}

impl<D: BlockDevice> FaultyDevice<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults::default()),
        }
    }

    pub fn faults(&self) -> Arc<Faults> {
        Arc::clone(&self.faults)
    }
}

impl<D: BlockDevice> BlockDevice for FaultyDevice<D> {
    fn init(&mut self) -> Result<(), BlockStatus> {
        if Faults::armed(&self.faults.fail_init) {
            return Err(BlockStatus::NotReady);
        }
        self.inner.init()
    }

    fn shutdown(&mut self) -> Result<(), BlockStatus> {
        self.inner.shutdown()
    }

    fn read_blocks(&mut self, block: u64, count: usize, buf: &mut [u8]) -> Result<(), BlockStatus> {
        if Faults::armed(&self.faults.fail_reads) {
            return Err(BlockStatus::IoError);
        }
        self.inner.read_blocks(block, count, buf)
    }

    fn write_blocks(&mut self, block: u64, count: usize, buf: &[u8]) -> Result<(), BlockStatus> {
        if Faults::armed(&self.faults.fail_writes) {
            return Err(BlockStatus::IoError);
        }
        self.inner.write_blocks(block, count, buf)
    }

    fn count_blocks(&self) -> u64 {
        self.inner.count_blocks()
    }

    fn flush(&mut self) -> Result<(), BlockStatus> {
        self.inner.flush()
    }

    fn l_block_size(&self) -> u8 {
        self.inner.l_block_size()
    }
}

/// A name registry that refuses every publication
#[derive(Debug, Clone, Copy)]
pub struct RejectingRegistry(pub Errno);

impl NameRegistry for RejectingRegistry {
    fn add(&self, _path: &str, _handler: Arc<dyn VfsHandler>) -> Result<(), Errno> {
        Err(self.0)
    }

    fn remove(&self, _path: &str) -> Result<(), Errno> {
        Err(Errno::ENOENT)
    }
}

/// A storage backend over a RAM disk
pub struct RamBackend {
    class: DeviceClass,
    disk: RamDisk,
    present: bool,
    dma: bool,
}

impl RamBackend {
    pub fn new(class: DeviceClass, disk: &RamDisk) -> Self {
        Self {
            class,
            disk: disk.share(),
            present: true,
            dma: false,
        }
    }

    /// A backend whose device never answers
    pub fn absent(class: DeviceClass) -> Self {
        Self {
            class,
            disk: RamDisk::new(0),
            present: false,
            dma: false,
        }
    }

    /// Offer a DMA view of the disk as well
    pub fn with_dma(mut self) -> Self {
        self.dma = true;
        self
    }
}

impl StorageBackend for RamBackend {
    fn class(&self) -> DeviceClass {
        self.class
    }

    fn probe(&mut self) -> Result<u64, BlockStatus> {
        if !self.present {
            return Err(BlockStatus::NotFound);
        }
        self.disk.init()?;
        Ok(self.disk.size() as u64)
    }

    fn read_boot_sector(&mut self, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), BlockStatus> {
        self.disk.read_blocks(0, 1, buf)
    }

    fn whole_device(&mut self) -> Option<Box<dyn BlockDevice>> {
        Some(Box::new(self.disk.share()))
    }

    fn whole_device_dma(&mut self) -> Option<Box<dyn BlockDevice>> {
        if self.dma {
            Some(Box::new(self.disk.share()))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faults_toggle() {
        let mut dev = FaultyDevice::new(RamDisk::new(4096));
        let faults = dev.faults();
        Faults::set(&faults.fail_init, true);
        assert_eq!(dev.init(), Err(BlockStatus::NotReady));
        Faults::set(&faults.fail_init, false);
        dev.init().unwrap();

        let mut buf = [0u8; 512];
        Faults::set(&faults.fail_reads, true);
        assert_eq!(dev.read_blocks(0, 1, &mut buf), Err(BlockStatus::IoError));
        Faults::set(&faults.fail_reads, false);
        dev.read_blocks(0, 1, &mut buf).unwrap();
    }

    #[test]
    fn test_absent_backend() {
        let mut backend = RamBackend::absent(DeviceClass::MemoryCard);
        assert_eq!(backend.probe(), Err(BlockStatus::NotFound));
    }
}
