//! Block I/O
//!
//! Everything below the FAT engine:
//!
//! - **block**: the [`BlockDevice`](block::BlockDevice) trait and status codes
//! - **ramdisk**: in-memory block device
//! - **dma**: aligned scratch buffers for DMA transfers
//! - **router**: per-volume PIO/DMA transfer selection and disk control
//! - **disk**: MBR partition table scanning
//!
//! # I/O Flow
//!
//! 1. The engine issues a disk callback for a logical drive
//! 2. The adapter finds the drive's router in the mount table
//! 3. The router picks PIO, direct DMA or scratch-buffered DMA
//! 4. Device failures are classified into a disk result and an errno

pub mod block;
pub mod disk;
pub mod dma;
pub mod ramdisk;
pub mod router;

pub use block::{BlockDevice, BlockStats, BlockStatus, SECTOR_SIZE};
pub use disk::{classify, scan, scan_slot, FatKind, PartitionClass, SlotScan};
pub use dma::DmaBuffer;
pub use ramdisk::RamDisk;
pub use router::{DiskRouter, IoPath};
