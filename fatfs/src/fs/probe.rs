//! Device Discovery
//!
//! Finds FAT partitions on a storage device and mounts each one under the
//! device class's path: slot 0 at `/sd` or `/ide`, further slots at
//! `/sd1`, `/ide2` and so on.
//!
//! # Discovery
//! 1. Bring the device up; a missing device ends discovery
//! 2. Read sector 0 and walk the four primary partition slots
//! 3. Skip slots without an MBR or with a zero type byte
//! 4. Mount FAT16/FAT32 slots on a whole-disk device; log anything else
//!
//! A slot that fails to mount is logged and skipped, the others still mount.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;

use log::{debug, error, info};

use super::engine::FatEngine;
use super::errno::Errno;
use super::vfs::NameRegistry;
use super::FatFs;
use crate::config::MAX_PARTITIONS;
use crate::io::block::{BlockDevice, BlockStatus, SECTOR_SIZE};
use crate::io::disk::{partition_type, scan_slot, PartitionClass, SlotScan};

/// Kind of storage a backend drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    /// SD/MMC card on the serial port adapter
    MemoryCard,
    /// ATA disk on the G1 bus
    Ata,
}

impl DeviceClass {
    /// Mount path prefix for the class
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::MemoryCard => "/sd",
            Self::Ata => "/ide",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::MemoryCard => "SD card",
            Self::Ata => "G1 ATA",
        }
    }

    /// Whether the class can offer a DMA companion device
    pub const fn supports_dma(self) -> bool {
        matches!(self, Self::Ata)
    }

    /// Path partition `slot` is mounted at
    pub fn mount_path(self, slot: usize) -> String {
        if slot == 0 {
            String::from(self.prefix())
        } else {
            format!("{}{}", self.prefix(), slot)
        }
    }
}

/// A storage device that partitions can be discovered on
pub trait StorageBackend {
    fn class(&self) -> DeviceClass;

    /// Bring the device up and return its capacity in bytes
    fn probe(&mut self) -> Result<u64, BlockStatus>;

    /// Read sector 0
    fn read_boot_sector(&mut self, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), BlockStatus>;

    /// A block device spanning the whole disk, for the engine to mount
    fn whole_device(&mut self) -> Option<Box<dyn BlockDevice>>;

    /// A DMA-capable view of the whole disk
    fn whole_device_dma(&mut self) -> Option<Box<dyn BlockDevice>> {
        None
    }
}

/// Mount every FAT partition found on `backend`.
///
/// Returns the number of volumes mounted. Fails only when the device is
/// absent (`ENODEV`) or its first sector cannot be read (`EIO`).
pub fn mount_device<E, R>(fs: &Arc<FatFs<E, R>>, backend: &mut dyn StorageBackend) -> Result<usize, Errno>
where
    E: FatEngine,
    R: NameRegistry,
{
    let class = backend.class();
    info!("FATFS: Checking for {} devices...", class.name());

    let capacity = match backend.probe() {
        Ok(bytes) => bytes,
        Err(e) => {
            info!("FATFS: {} not found: {}", class.name(), e);
            return Err(Errno::ENODEV);
        }
    };
    info!("FATFS: {} initialized, capacity {} MB", class.name(), capacity >> 20);

    let mut mbr = [0u8; SECTOR_SIZE];
    if let Err(e) = backend.read_boot_sector(&mut mbr) {
        error!("FATFS: Can't read MBR from {}: {}", class.name(), e);
        return Err(Errno::EIO);
    }

    let mut mounted = 0;
    for slot in 0..MAX_PARTITIONS {
        let desc = match scan_slot(&mbr, 0, slot) {
            SlotScan::Present(desc) => desc,
            SlotScan::NoMbr => {
                debug!("FATFS: {} doesn't appear to have a MBR", class.name());
                break;
            }
            SlotScan::Empty => continue,
        };

        let kind = match desc.class {
            PartitionClass::Fat(kind) => kind,
            PartitionClass::Unrecognized => {
                info!(
                    "FATFS: Unknown filesystem: 0x{:02x} ({})",
                    desc.entry.partition_type,
                    partition_type::name(desc.entry.partition_type)
                );
                continue;
            }
        };
        info!("FATFS: Detected FAT{} filesystem on partition {}", kind.bits(), slot);

        if let Err(e) = fs.init() {
            error!("FATFS: Could not initialize fs_fat: {}", e);
            continue;
        }
        let Some(pio) = backend.whole_device() else {
            error!("FATFS: No block device for partition {}", slot);
            continue;
        };
        let dma = if class.supports_dma() {
            backend.whole_device_dma()
        } else {
            None
        };

        let path = class.mount_path(slot);
        info!("FATFS: Mounting filesystem at {}...", path);
        match fs.mount(&path, pio, dma, slot as u8) {
            Ok(drive) => {
                debug!("FATFS: {} is drive {}", path, drive);
                mounted += 1;
            }
            Err(e) => info!("FATFS: Could not mount device as fatfs: {}", e),
        }
    }
    Ok(mounted)
}

/// Unmount every volume of `class`; returns how many were unmounted
pub fn unmount_device<E, R>(fs: &FatFs<E, R>, class: DeviceClass) -> usize
where
    E: FatEngine,
    R: NameRegistry,
{
    let mut unmounted = 0;
    for slot in 0..MAX_PARTITIONS {
        let path = class.mount_path(slot);
        if fs.is_mounted(&path) == 0 {
            continue;
        }
        match fs.unmount(&path) {
            Ok(()) => unmounted += 1,
            Err(e) => error!("FATFS: Unmounting {}: {}", path, e),
        }
    }
    unmounted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_paths() {
        assert_eq!(DeviceClass::MemoryCard.mount_path(0), "/sd");
        assert_eq!(DeviceClass::MemoryCard.mount_path(2), "/sd2");
        assert_eq!(DeviceClass::Ata.mount_path(0), "/ide");
        assert_eq!(DeviceClass::Ata.mount_path(3), "/ide3");
    }

    #[test]
    fn test_dma_only_on_ata() {
        assert!(DeviceClass::Ata.supports_dma());
        assert!(!DeviceClass::MemoryCard.supports_dma());
    }
}
