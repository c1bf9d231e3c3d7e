//! Partition Scanner
//!
//! Reads the classic MBR partition table from a device's first sector and
//! decides which primary slots hold a FAT volume the adapter can mount.
//!
//! # Sector 0 layout
//! ```text
//!   0x000 ┌──────────────────────────┐
//!         │ boot code                │
//!   0x1BE ├──────────────────────────┤
//!         │ 4 x 16-byte entries      │  type at +4, start LBA at +8,
//!   0x1FE ├──────────────────────────┤  sector count at +12
//!         │ 0x55 0xAA                │
//!   0x200 └──────────────────────────┘
//! ```

use core::fmt;

use crate::config::MAX_PARTITIONS;

use super::block::SECTOR_SIZE;

/// Offset of the first partition entry
pub const PARTITION_TABLE_OFFSET: usize = 0x1BE;

/// Size of one partition entry
pub const PARTITION_ENTRY_SIZE: usize = 16;

/// Offset of the boot signature
pub const MBR_SIGNATURE_OFFSET: usize = 0x1FE;

/// Partition type codes
pub mod partition_type {
    pub const EMPTY: u8 = 0x00;
    pub const FAT12: u8 = 0x01;
    pub const FAT16_SMALL: u8 = 0x04;
    pub const EXTENDED: u8 = 0x05;
    pub const FAT16: u8 = 0x06;
    pub const NTFS: u8 = 0x07;
    pub const FAT32: u8 = 0x0B;
    pub const FAT32_LBA: u8 = 0x0C;
    pub const FAT16_LBA: u8 = 0x0E;
    pub const EXTENDED_LBA: u8 = 0x0F;
    pub const LINUX: u8 = 0x83;
    pub const GPT_PROTECTIVE: u8 = 0xEE;

    /// Get partition type name
    pub fn name(type_code: u8) -> &'static str {
        match type_code {
            EMPTY => "Empty",
            FAT12 => "FAT12",
            FAT16_SMALL | FAT16 | FAT16_LBA => "FAT16",
            EXTENDED | EXTENDED_LBA => "Extended",
            NTFS => "NTFS",
            FAT32 | FAT32_LBA => "FAT32",
            LINUX => "Linux",
            GPT_PROTECTIVE => "GPT Protective",
            _ => "Unknown",
        }
    }
}

/// FAT flavour of a mountable partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatKind {
    Fat16,
    Fat32,
}

impl FatKind {
    pub const fn bits(self) -> u8 {
        match self {
            Self::Fat16 => 16,
            Self::Fat32 => 32,
        }
    }
}

/// What a partition type code means to the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionClass {
    Fat(FatKind),
    Unrecognized,
}

/// Classify a partition type code.
///
/// Only the CHS and LBA variants of FAT16 (0x04, 0x06) and FAT32
/// (0x0B, 0x0C) are mountable.
pub const fn classify(type_code: u8) -> PartitionClass {
    match type_code {
        partition_type::FAT16_SMALL | partition_type::FAT16 => PartitionClass::Fat(FatKind::Fat16),
        partition_type::FAT32 | partition_type::FAT32_LBA => PartitionClass::Fat(FatKind::Fat32),
        _ => PartitionClass::Unrecognized,
    }
}

/// One primary partition table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MbrPartitionEntry {
    /// Boot indicator (0x80 = bootable)
    pub boot_flag: u8,
    pub partition_type: u8,
    pub start_lba: u32,
    pub total_sectors: u32,
}

impl MbrPartitionEntry {
    pub fn parse(raw: &[u8; PARTITION_ENTRY_SIZE]) -> Self {
        Self {
            boot_flag: raw[0],
            partition_type: raw[4],
            start_lba: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            total_sectors: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
        }
    }

    /// Encode as an LBA-only entry (CHS fields left zero)
    pub fn encode(&self) -> [u8; PARTITION_ENTRY_SIZE] {
        let mut raw = [0u8; PARTITION_ENTRY_SIZE];
        raw[0] = self.boot_flag;
        raw[4] = self.partition_type;
        raw[8..12].copy_from_slice(&self.start_lba.to_le_bytes());
        raw[12..16].copy_from_slice(&self.total_sectors.to_le_bytes());
        raw
    }

    pub fn is_empty(&self) -> bool {
        self.partition_type == partition_type::EMPTY
    }
}

/// A present partition slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionDescriptor {
    /// Device number the sector was read from
    pub device: u8,
    /// Primary slot, 0..4
    pub index: u8,
    pub class: PartitionClass,
    pub entry: MbrPartitionEntry,
}

impl fmt::Display for PartitionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dev {} part {}: {} (0x{:02x}) at {} +{}",
            self.device,
            self.index,
            partition_type::name(self.entry.partition_type),
            self.entry.partition_type,
            self.entry.start_lba,
            self.entry.total_sectors
        )
    }
}

/// Outcome of inspecting one partition slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotScan {
    /// Sector 0 lacks the 0x55 0xAA signature
    NoMbr,
    /// Slot type is zero, or the slot index is past the table
    Empty,
    Present(PartitionDescriptor),
}

pub fn has_mbr_signature(sector: &[u8; SECTOR_SIZE]) -> bool {
    sector[MBR_SIGNATURE_OFFSET] == 0x55 && sector[MBR_SIGNATURE_OFFSET + 1] == 0xAA
}

fn raw_entry(sector: &[u8; SECTOR_SIZE], slot: usize) -> [u8; PARTITION_ENTRY_SIZE] {
    let off = PARTITION_TABLE_OFFSET + slot * PARTITION_ENTRY_SIZE;
    let mut raw = [0u8; PARTITION_ENTRY_SIZE];
    raw.copy_from_slice(&sector[off..off + PARTITION_ENTRY_SIZE]);
    raw
}

/// Inspect primary slot `slot` of the MBR in `sector`
pub fn scan_slot(sector: &[u8; SECTOR_SIZE], device: u8, slot: usize) -> SlotScan {
    if !has_mbr_signature(sector) {
        return SlotScan::NoMbr;
    }
    if slot >= MAX_PARTITIONS {
        return SlotScan::Empty;
    }
    let entry = MbrPartitionEntry::parse(&raw_entry(sector, slot));
    if entry.is_empty() {
        return SlotScan::Empty;
    }
    SlotScan::Present(PartitionDescriptor {
        device,
        index: slot as u8,
        class: classify(entry.partition_type),
        entry,
    })
}

/// Inspect all primary slots
pub fn scan(sector: &[u8; SECTOR_SIZE], device: u8) -> [SlotScan; MAX_PARTITIONS] {
    core::array::from_fn(|slot| scan_slot(sector, device, slot))
}

/// Write a partition table and signature into `sector`
pub fn write_table(sector: &mut [u8; SECTOR_SIZE], entries: &[MbrPartitionEntry]) {
    for (slot, entry) in entries.iter().take(MAX_PARTITIONS).enumerate() {
        let off = PARTITION_TABLE_OFFSET + slot * PARTITION_ENTRY_SIZE;
        sector[off..off + PARTITION_ENTRY_SIZE].copy_from_slice(&entry.encode());
    }
    sector[MBR_SIGNATURE_OFFSET] = 0x55;
    sector[MBR_SIGNATURE_OFFSET + 1] = 0xAA;
}
