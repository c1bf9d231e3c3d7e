//! Virtual File System Surface
//!
//! Types the host VFS uses to talk to a mounted FAT volume, and the name
//! registry that maps mount paths to handlers.
//!
//! # Key Concepts
//! - **VfsHandler**: per-volume operation table, registered under a path
//! - **Fd**: descriptor returned by open, global across all volumes
//! - **DirEntry**: directory record produced by readdir
//! - **NameRegistry**: where handlers are published (`/sd`, `/ide1`, ...)

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use spin::Mutex;

use super::errno::Errno;

bitflags::bitflags! {
    /// Open mode flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenFlags: u32 {
        const RDONLY = 0x0000;
        const WRONLY = 0x0001;
        const RDWR = 0x0002;
        /// Mask selecting the access mode
        const MODE_MASK = 0x0003;
        const APPEND = 0x0008;
        const CREAT = 0x0100;
        const TRUNC = 0x0200;
        const EXCL = 0x0400;
        /// Open a directory for enumeration
        const DIR = 0x10000;
    }
}

impl OpenFlags {
    /// Access mode bits alone (RDONLY, WRONLY, RDWR, or the invalid 3)
    pub fn access_mode(self) -> u32 {
        self.bits() & Self::MODE_MASK.bits()
    }
}

/// Seek origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SeekWhence {
    Set = 0,
    Cur = 1,
    End = 2,
}

impl SeekWhence {
    pub const fn from_raw(whence: i32) -> Option<Self> {
        match whence {
            0 => Some(Self::Set),
            1 => Some(Self::Cur),
            2 => Some(Self::End),
            _ => None,
        }
    }
}

/// File mode bits reported by stat
pub mod mode_bits {
    pub const S_IFDIR: u32 = 0o040000;
    pub const S_IFREG: u32 = 0o100000;
    pub const S_IRUSR: u32 = 0o400;
    pub const S_IXUSR: u32 = 0o100;
    pub const S_IRGRP: u32 = 0o040;
    pub const S_IXGRP: u32 = 0o010;
    pub const S_IROTH: u32 = 0o004;
    pub const S_IXOTH: u32 = 0o001;
    /// Read and execute for everyone
    pub const S_IRX_ALL: u32 = S_IRUSR | S_IXUSR | S_IRGRP | S_IXGRP | S_IROTH | S_IXOTH;
}

/// Open file descriptor; `slot + 1`, so 0 is never valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(u32);

impl Fd {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub(crate) const fn from_slot(slot: usize) -> Self {
        Self(slot as u32 + 1)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Pool slot, `None` for descriptor 0
    pub fn slot(self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directory entry produced by readdir
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirEntry {
    pub name: String,
    /// Size in bytes, -1 for directories
    pub size: i64,
    /// Modification time, Unix seconds
    pub time: i64,
    /// [`OpenFlags::DIR`] for directories, empty otherwise
    pub attr: OpenFlags,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.attr.contains(OpenFlags::DIR)
    }
}

/// File status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    /// Logical drive number + 1
    pub st_dev: u64,
    pub st_mode: u32,
    pub st_nlink: u32,
    /// Size in bytes, -1 for directories
    pub st_size: i64,
    pub st_blksize: u32,
    pub st_blocks: u64,
    pub st_atime: i64,
    pub st_mtime: i64,
    pub st_ctime: i64,
}

impl Stat {
    pub fn is_dir(&self) -> bool {
        self.st_mode & mode_bits::S_IFDIR != 0
    }
}

/// Volume-specific control requests
#[derive(Debug)]
pub enum Ioctl<'a> {
    /// Copy sector 0 of the drive into the buffer
    BootSector(&'a mut [u8]),
    /// First sector of the file's first cluster
    FileLba,
    /// Copy the file's cluster link map into the buffer
    LinkMap(&'a mut [u32]),
    /// Pass a disk control command to the drive
    Disk(crate::fs::engine::DiskCmd),
}

/// File control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fcntl {
    GetFl,
    SetFl(u32),
    GetFd,
    SetFd(u32),
    Other(i32),
}

/// Operation table the host calls for paths under a mount point.
///
/// Paths are relative to the mount point. Descriptors are global: any
/// handler accepts a descriptor opened through another.
pub trait VfsHandler: Send + Sync {
    fn open(&self, path: &str, flags: OpenFlags) -> Result<Fd, Errno>;
    fn close(&self, fd: Fd) -> Result<(), Errno>;
    fn read(&self, fd: Fd, buf: &mut [u8]) -> Result<usize, Errno>;
    fn write(&self, fd: Fd, buf: &[u8]) -> Result<usize, Errno>;
    /// Returns the new position
    fn seek(&self, fd: Fd, offset: i64, whence: i32) -> Result<u64, Errno>;
    fn tell(&self, fd: Fd) -> Result<u64, Errno>;
    fn total(&self, fd: Fd) -> Result<u64, Errno>;
    /// Next entry, `None` at the end of the directory
    fn readdir(&self, fd: Fd) -> Result<Option<DirEntry>, Errno>;
    fn rewinddir(&self, fd: Fd) -> Result<(), Errno>;
    fn ioctl(&self, fd: Fd, req: Ioctl<'_>) -> Result<u64, Errno>;
    fn rename(&self, from: &str, to: &str) -> Result<(), Errno>;
    fn unlink(&self, path: &str) -> Result<(), Errno>;
    /// Whole file contents
    fn mmap(&self, fd: Fd) -> Result<Vec<u8>, Errno>;
    /// Flush the file to the medium
    fn complete(&self, fd: Fd) -> Result<(), Errno>;
    fn stat(&self, path: &str, flag: i32) -> Result<Stat, Errno>;
    fn fstat(&self, fd: Fd) -> Result<Stat, Errno>;
    fn mkdir(&self, path: &str) -> Result<(), Errno>;
    fn rmdir(&self, path: &str) -> Result<(), Errno>;
    fn fcntl(&self, fd: Fd, cmd: Fcntl) -> Result<i32, Errno>;

    fn link(&self, _from: &str, _to: &str) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    fn symlink(&self, _target: &str, _path: &str) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    fn readlink(&self, _path: &str, _buf: &mut [u8]) -> Result<usize, Errno> {
        Err(Errno::ENOSYS)
    }

    fn poll(&self, _fd: Fd, _events: u32) -> Result<u32, Errno> {
        Err(Errno::ENOSYS)
    }
}

/// Host name registry that mount points are published in
pub trait NameRegistry: Send + 'static {
    fn add(&self, path: &str, handler: Arc<dyn VfsHandler>) -> Result<(), Errno>;
    fn remove(&self, path: &str) -> Result<(), Errno>;
}

impl<T: NameRegistry + Sync> NameRegistry for Arc<T> {
    fn add(&self, path: &str, handler: Arc<dyn VfsHandler>) -> Result<(), Errno> {
        (**self).add(path, handler)
    }

    fn remove(&self, path: &str) -> Result<(), Errno> {
        (**self).remove(path)
    }
}

/// Strip `mount_path` from `path`, returning the volume-relative rest
fn match_mount_path<'a>(mount_path: &str, path: &'a str) -> Option<&'a str> {
    if path == mount_path {
        return Some("/");
    }
    let rest = path.strip_prefix(mount_path)?;
    if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

/// In-memory name registry with longest-prefix resolution
#[derive(Default)]
pub struct MountNames {
    entries: Mutex<BTreeMap<String, Arc<dyn VfsHandler>>>,
}

impl MountNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Arc<dyn VfsHandler>> {
        self.entries.lock().get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handler owning `path` and the path relative to its mount point
    pub fn resolve(&self, path: &str) -> Option<(Arc<dyn VfsHandler>, String)> {
        let entries = self.entries.lock();
        entries
            .iter()
            .filter_map(|(mount, handler)| {
                match_mount_path(mount, path).map(|rest| (mount.len(), handler, rest))
            })
            .max_by_key(|(len, _, _)| *len)
            .map(|(_, handler, rest)| (Arc::clone(handler), rest.to_string()))
    }
}

impl NameRegistry for MountNames {
    fn add(&self, path: &str, handler: Arc<dyn VfsHandler>) -> Result<(), Errno> {
        let mut entries = self.entries.lock();
        if entries.contains_key(path) {
            return Err(Errno::EEXIST);
        }
        entries.insert(path.to_string(), handler);
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), Errno> {
        self.entries
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or(Errno::ENOENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    impl VfsHandler for Nop {
        fn open(&self, _: &str, _: OpenFlags) -> Result<Fd, Errno> {
            Ok(Fd::from_raw(1))
        }
        fn close(&self, _: Fd) -> Result<(), Errno> {
            Ok(())
        }
        fn read(&self, _: Fd, _: &mut [u8]) -> Result<usize, Errno> {
            Ok(0)
        }
        fn write(&self, _: Fd, _: &[u8]) -> Result<usize, Errno> {
            Ok(0)
        }
        fn seek(&self, _: Fd, _: i64, _: i32) -> Result<u64, Errno> {
            Ok(0)
        }
        fn tell(&self, _: Fd) -> Result<u64, Errno> {
            Ok(0)
        }
        fn total(&self, _: Fd) -> Result<u64, Errno> {
            Ok(0)
        }
        fn readdir(&self, _: Fd) -> Result<Option<DirEntry>, Errno> {
            Ok(None)
        }
        fn rewinddir(&self, _: Fd) -> Result<(), Errno> {
            Ok(())
        }
        fn ioctl(&self, _: Fd, _: Ioctl<'_>) -> Result<u64, Errno> {
            Ok(0)
        }
        fn rename(&self, _: &str, _: &str) -> Result<(), Errno> {
            Ok(())
        }
        fn unlink(&self, _: &str) -> Result<(), Errno> {
            Ok(())
        }
        fn mmap(&self, _: Fd) -> Result<Vec<u8>, Errno> {
            Ok(Vec::new())
        }
        fn complete(&self, _: Fd) -> Result<(), Errno> {
            Ok(())
        }
        fn stat(&self, _: &str, _: i32) -> Result<Stat, Errno> {
            Ok(Stat::default())
        }
        fn fstat(&self, _: Fd) -> Result<Stat, Errno> {
            Ok(Stat::default())
        }
        fn mkdir(&self, _: &str) -> Result<(), Errno> {
            Ok(())
        }
        fn rmdir(&self, _: &str) -> Result<(), Errno> {
            Ok(())
        }
        fn fcntl(&self, _: Fd, _: Fcntl) -> Result<i32, Errno> {
            Ok(0)
        }
    }

    #[test]
    fn test_longest_prefix() {
        let names = MountNames::new();
        names.add("/sd", Arc::new(Nop)).unwrap();
        names.add("/sd1", Arc::new(Nop)).unwrap();

        let (_, rest) = names.resolve("/sd1/DATA.BIN").unwrap();
        assert_eq!(rest, "/DATA.BIN");
        let (_, rest) = names.resolve("/sd").unwrap();
        assert_eq!(rest, "/");
        assert!(names.resolve("/sdx/file").is_none());
    }

    #[test]
    fn test_duplicate_and_remove() {
        let names = MountNames::new();
        names.add("/ide", Arc::new(Nop)).unwrap();
        assert_eq!(names.add("/ide", Arc::new(Nop)).unwrap_err(), Errno::EEXIST);
        names.remove("/ide").unwrap();
        assert_eq!(names.remove("/ide"), Err(Errno::ENOENT));
        assert!(names.is_empty());
    }

    #[test]
    fn test_unsupported_defaults() {
        assert_eq!(Nop.link("/a", "/b"), Err(Errno::ENOSYS));
        assert_eq!(Nop.poll(Fd::from_raw(1), 0), Err(Errno::ENOSYS));
    }

    #[test]
    fn test_fd_slots() {
        assert_eq!(Fd::from_slot(0).raw(), 1);
        assert_eq!(Fd::from_raw(0).slot(), None);
        assert_eq!(Fd::from_raw(16).slot(), Some(15));
        assert_eq!(OpenFlags::from_bits_retain(3).access_mode(), 3);
    }
}
