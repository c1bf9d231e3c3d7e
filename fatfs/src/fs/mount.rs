//! Mount Table
//!
//! Maps logical drive numbers to mounted volumes. The slot index is the
//! drive number the engine uses, and its path form is `"N:"`.
//!
//! # Mount Table
//! ```text
//!   slot 0 ── "/sd"   "0:"  router(pio, dma?)  geometry  handler
//!   slot 1 ── "/ide"  "1:"  router(pio)        geometry  handler
//!   slot 2 ── free
//! ```

use alloc::string::String;
use alloc::sync::Arc;
use core::fmt::Write;

use super::engine::VolumeGeometry;
use super::vfs::VfsHandler;
use crate::config::{MAX_DRIVE_PATH, MAX_FAT_MOUNTS};
use crate::io::router::DiskRouter;

/// A mounted (or mounting) volume
pub struct Volume {
    pub drive: u8,
    /// Path the volume is published under
    pub path: String,
    /// Logical drive path, "N:"
    pub dev_path: String,
    /// Partition slot on the underlying device
    pub partition: u8,
    pub router: DiskRouter,
    /// Set once the engine has mounted the volume
    pub geometry: Option<VolumeGeometry>,
    /// Registration handle, set once published
    pub vfsh: Option<Arc<dyn VfsHandler>>,
    /// Mount counter value when the slot was installed
    pub generation: u64,
}

impl Volume {
    pub fn new(drive: u8, path: &str, partition: u8, router: DiskRouter) -> Self {
        let mut dev_path = String::with_capacity(MAX_DRIVE_PATH);
        let _ = write!(dev_path, "{}:", drive);
        Self {
            drive,
            path: String::from(path),
            dev_path,
            partition,
            router,
            geometry: None,
            vfsh: None,
            generation: 0,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.vfsh.is_some()
    }

    /// Bytes per cluster, 0 before the engine has mounted the volume
    pub fn cluster_bytes(&self) -> u64 {
        self.geometry
            .map(|g| (g.csize as u64) << self.router.l_block_size())
            .unwrap_or(0)
    }
}

/// Snapshot of a mounted volume for callers outside the lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub drive: u8,
    pub path: String,
    pub dev_path: String,
    pub partition: u8,
    pub geometry: Option<VolumeGeometry>,
    pub block_size: u32,
    pub has_dma: bool,
    pub has_scratch: bool,
}

impl From<&Volume> for VolumeInfo {
    fn from(vol: &Volume) -> Self {
        Self {
            drive: vol.drive,
            path: vol.path.clone(),
            dev_path: vol.dev_path.clone(),
            partition: vol.partition,
            geometry: vol.geometry,
            block_size: vol.router.block_size(),
            has_dma: vol.router.has_dma(),
            has_scratch: vol.router.has_scratch(),
        }
    }
}

/// Fixed table of [`MAX_FAT_MOUNTS`] volume slots
pub struct MountTable {
    slots: [Option<Volume>; MAX_FAT_MOUNTS],
    installs: u64,
}

impl MountTable {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
            installs: 0,
        }
    }

    pub fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Put `vol` in its drive slot and return its generation
    pub fn install(&mut self, mut vol: Volume) -> u64 {
        self.installs += 1;
        vol.generation = self.installs;
        let slot = vol.drive as usize;
        self.slots[slot] = Some(vol);
        self.installs
    }

    /// True while `slot` still holds the volume installed as `generation`
    pub fn is_current(&self, slot: usize, generation: u64) -> bool {
        self.get(slot).is_some_and(|vol| vol.generation == generation)
    }

    pub fn get(&self, slot: usize) -> Option<&Volume> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Volume> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    pub fn router_mut(&mut self, drive: u8) -> Option<&mut DiskRouter> {
        self.get_mut(drive as usize).map(|vol| &mut vol.router)
    }

    pub fn take(&mut self, slot: usize) -> Option<Volume> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    /// Slot of any volume using `path`, published or not
    pub fn find(&self, path: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|v| v.path == path))
    }

    /// Slot of the published volume at `path`
    pub fn find_registered(&self, path: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|v| v.is_registered() && v.path == path))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Volume> {
        self.slots.iter().flatten()
    }

    pub fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, s)| s.as_ref().map(|_| slot))
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ramdisk::RamDisk;
    use alloc::boxed::Box;

    fn volume(drive: u8, path: &str) -> Volume {
        let router = DiskRouter::new(drive, Box::new(RamDisk::new(4096)), None, false);
        Volume::new(drive, path, 0, router)
    }

    #[test]
    fn test_slots() {
        let mut table = MountTable::new();
        assert_eq!(table.free_slot(), Some(0));
        table.install(volume(0, "/sd"));
        assert_eq!(table.free_slot(), Some(1));
        assert_eq!(table.find("/sd"), Some(0));
        assert_eq!(table.find_registered("/sd"), None);
        assert_eq!(table.get(0).unwrap().dev_path, "0:");

        assert!(table.take(0).is_some());
        assert_eq!(table.count(), 0);
        assert!(table.take(MAX_FAT_MOUNTS).is_none());
    }

    #[test]
    fn test_reinstalled_slot_gets_new_generation() {
        let mut table = MountTable::new();
        let first = table.install(volume(0, "/sd"));
        assert!(table.is_current(0, first));
        table.take(0);
        assert!(!table.is_current(0, first));

        let second = table.install(volume(0, "/ide"));
        assert_ne!(first, second);
        assert!(table.is_current(0, second));
        assert!(!table.is_current(0, first));
    }

    #[test]
    fn test_cluster_bytes_before_mount() {
        let vol = volume(3, "/ide");
        assert_eq!(vol.cluster_bytes(), 0);
        assert_eq!(vol.dev_path, "3:");
    }
}
