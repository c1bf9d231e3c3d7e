//! Handle Pool
//!
//! Open files and directories live in a fixed table of
//! [`MAX_FAT_FILES`] slots shared by every mounted volume. A slot is
//! either free or holds exactly one engine object; the descriptor handed
//! to the host is the slot index plus one.

use super::errno::Errno;
use super::linkmap::LinkMap;
use super::vfs::{DirEntry, Fd, OpenFlags};
use crate::config::MAX_FAT_FILES;

/// Engine object behind a handle
pub enum HandleObject<F, D> {
    File(F),
    Dir(D),
}

/// An open file or directory
pub struct FileHandle<F, D> {
    pub obj: HandleObject<F, D>,
    /// Flags the host opened with
    pub mode: OpenFlags,
    /// Fast-seek table, built on demand for large read-only files
    pub link_map: Option<LinkMap>,
    /// Last entry returned by readdir
    pub dent: DirEntry,
    /// Mount slot the handle was opened on
    pub mnt: usize,
}

impl<F, D> FileHandle<F, D> {
    pub fn file(file: F, mode: OpenFlags, mnt: usize) -> Self {
        Self {
            obj: HandleObject::File(file),
            mode,
            link_map: None,
            dent: DirEntry::default(),
            mnt,
        }
    }

    pub fn dir(dir: D, mode: OpenFlags, mnt: usize) -> Self {
        Self {
            obj: HandleObject::Dir(dir),
            mode,
            link_map: None,
            dent: DirEntry::default(),
            mnt,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.obj, HandleObject::Dir(_))
    }
}

/// Fixed table of handles
pub struct HandlePool<F, D> {
    slots: [Option<FileHandle<F, D>>; MAX_FAT_FILES],
}

impl<F, D> HandlePool<F, D> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    /// First free slot
    pub fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Occupy a free slot and return its descriptor
    pub fn insert(&mut self, handle: FileHandle<F, D>) -> Result<Fd, Errno> {
        let slot = self.free_slot().ok_or(Errno::ENFILE)?;
        self.slots[slot] = Some(handle);
        Ok(Fd::from_slot(slot))
    }

    fn index(fd: Fd) -> Result<usize, Errno> {
        match fd.slot() {
            Some(slot) if slot < MAX_FAT_FILES => Ok(slot),
            _ => Err(Errno::ENFILE),
        }
    }

    /// Handle for `fd`: ENFILE when out of range, EBADF when not open
    pub fn get_mut(&mut self, fd: Fd) -> Result<&mut FileHandle<F, D>, Errno> {
        let slot = Self::index(fd)?;
        self.slots[slot].as_mut().ok_or(Errno::EBADF)
    }

    pub fn get(&self, fd: Fd) -> Result<&FileHandle<F, D>, Errno> {
        let slot = Self::index(fd)?;
        self.slots[slot].as_ref().ok_or(Errno::EBADF)
    }

    /// Free the slot for `fd` and hand back what it held
    pub fn take(&mut self, fd: Fd) -> Result<FileHandle<F, D>, Errno> {
        let slot = Self::index(fd)?;
        self.slots[slot].take().ok_or(Errno::EBADF)
    }

    /// Free every slot
    pub fn drain(&mut self) -> impl Iterator<Item = FileHandle<F, D>> + '_ {
        self.slots.iter_mut().filter_map(Option::take)
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl<F, D> Default for HandlePool<F, D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Pool = HandlePool<u32, ()>;

    #[test]
    fn test_descriptors_are_slot_plus_one() {
        let mut pool = Pool::new();
        let a = pool.insert(FileHandle::file(7, OpenFlags::RDONLY, 0)).unwrap();
        let b = pool.insert(FileHandle::dir((), OpenFlags::DIR, 0)).unwrap();
        assert_eq!(a.raw(), 1);
        assert_eq!(b.raw(), 2);
        assert!(pool.get(b).unwrap().is_dir());

        pool.take(a).unwrap();
        let c = pool.insert(FileHandle::file(8, OpenFlags::RDONLY, 0)).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut pool = Pool::new();
        for _ in 0..MAX_FAT_FILES {
            pool.insert(FileHandle::file(0, OpenFlags::RDONLY, 0)).unwrap();
        }
        assert_eq!(pool.free_slot(), None);
        assert!(matches!(
            pool.insert(FileHandle::file(0, OpenFlags::RDONLY, 0)),
            Err(Errno::ENFILE)
        ));
        assert_eq!(pool.drain().count(), MAX_FAT_FILES);
        assert_eq!(pool.open_count(), 0);
    }

    #[test]
    fn test_bad_descriptors() {
        let mut pool = Pool::new();
        assert!(matches!(pool.get_mut(Fd::from_raw(0)), Err(Errno::ENFILE)));
        assert!(matches!(pool.get_mut(Fd::from_raw(17)), Err(Errno::ENFILE)));
        assert!(matches!(pool.get_mut(Fd::from_raw(3)), Err(Errno::EBADF)));
        assert!(matches!(pool.take(Fd::from_raw(3)), Err(Errno::EBADF)));
    }
}
