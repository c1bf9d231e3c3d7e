//! VFS Operation Adapter
//!
//! Implements every host file operation on top of the engine. Each call
//! takes the filesystem lock once, selects the volume's logical drive for
//! path operations, and turns engine result codes into error numbers.
//!
//! # Handle Lifecycle
//! ```text
//!   open ──► slot used ──► read / write / seek / readdir / ioctl ...
//!                                 │
//!   close ◄───────────────────────┘   (slot freed even if the engine
//!                                      fails to close)
//! ```

use alloc::sync::Weak;
use alloc::vec::Vec;

use log::{debug, error};

use super::engine::{
    AccessMode, DResult, DiskIo, EngineFile, FResult, FatEngine, FileInfo, SeekTarget,
};
use super::errno::Errno;
use super::handle::{FileHandle, HandleObject, HandlePool};
use super::linkmap::{self, LinkMap};
use super::time::unix_from_fat;
use super::vfs::{
    mode_bits, DirEntry, Fcntl, Fd, Ioctl, NameRegistry, OpenFlags, SeekWhence, Stat, VfsHandler,
};
use super::{DiskBus, FatFs, FsState};
use crate::io::block::SECTOR_SIZE;

/// Longest name copied from an 8.3 entry
const SHORT_NAME_LEN: usize = 12;

/// Failure inside an operation: an engine code still to be translated, or
/// a final error number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpError {
    Fs(FResult),
    Host(Errno),
}

impl From<FResult> for OpError {
    fn from(rc: FResult) -> Self {
        Self::Fs(rc)
    }
}

impl From<Errno> for OpError {
    fn from(errno: Errno) -> Self {
        Self::Host(errno)
    }
}

type OpResult<T> = Result<T, OpError>;

/// Engine creation flags for a host open mode, `None` if the mode is invalid
pub fn access_mode(flags: OpenFlags) -> Option<AccessMode> {
    let create = if flags.contains(OpenFlags::TRUNC) {
        AccessMode::CREATE_ALWAYS
    } else {
        AccessMode::CREATE_NEW
    };
    match flags.access_mode() {
        m if m == OpenFlags::RDONLY.bits() => Some(AccessMode::OPEN_EXISTING | AccessMode::READ),
        m if m == OpenFlags::WRONLY.bits() => Some(AccessMode::WRITE | create),
        m if m == OpenFlags::RDWR.bits() => Some(AccessMode::READ | AccessMode::WRITE | create),
        _ => None,
    }
}

/// Position an append-mode open starts at: one byte before the end of a
/// non-empty file.
pub fn append_position(size: u32) -> Option<u32> {
    size.checked_sub(1)
}

/// Blocks of `blksize` bytes needed for `size` bytes
fn block_count(size: u64, l_block_size: u8) -> u64 {
    let blksize = 1u64 << l_block_size;
    (size >> l_block_size) + u64::from(size & (blksize - 1) != 0)
}

/// Host directory entry for an engine record
fn dir_entry(info: &FileInfo) -> DirEntry {
    let name = if info.lfname.is_empty() {
        info.fname.chars().take(SHORT_NAME_LEN).collect()
    } else {
        info.lfname.clone()
    };
    let (size, attr) = if info.is_dir() {
        (-1, OpenFlags::DIR)
    } else {
        (info.fsize as i64, OpenFlags::empty())
    };
    DirEntry {
        name,
        size,
        time: unix_from_fat(info.fdate, info.ftime),
        attr,
    }
}

fn file_of<F, D>(handle: &mut FileHandle<F, D>) -> Result<&mut F, Errno> {
    match &mut handle.obj {
        HandleObject::File(file) => Ok(file),
        HandleObject::Dir(_) => Err(Errno::EISDIR),
    }
}

/// Borrowed pieces of the locked state an operation works on
pub(crate) struct OpCtx<'a, E: FatEngine> {
    engine: &'a mut E,
    bus: DiskBus<'a>,
    handles: &'a mut HandlePool<E::File, E::Dir>,
}

impl<E: FatEngine, R: NameRegistry> FsState<E, R> {
    pub(crate) fn ctx(&mut self) -> OpCtx<'_, E> {
        OpCtx {
            engine: &mut self.engine,
            bus: DiskBus {
                mounts: &mut self.mounts,
                errno: &mut self.errno,
                clock: &*self.clock,
            },
            handles: &mut self.handles,
        }
    }

    /// Settle an operation's outcome into the errno cell
    pub(crate) fn finish<T>(&mut self, op: &str, res: OpResult<T>) -> Result<T, Errno> {
        match res {
            Ok(v) => Ok(v),
            Err(OpError::Host(errno)) => {
                debug!("FATFS: {}: {}", op, errno);
                Err(self.fail(errno))
            }
            Err(OpError::Fs(rc)) => Err(self.engine_error(op, rc)),
        }
    }

    /// Run `f` with a fresh errno cell and settle the result
    pub(crate) fn run<T>(
        &mut self,
        op: &str,
        f: impl FnOnce(&mut OpCtx<'_, E>) -> OpResult<T>,
    ) -> Result<T, Errno> {
        self.errno = Errno::NONE;
        let res = f(&mut self.ctx());
        self.finish(op, res)
    }
}

impl<E: FatEngine> OpCtx<'_, E> {
    /// Select the volume's drive so paths resolve against it
    fn select_drive(&mut self, mnt: usize) -> OpResult<u8> {
        let drive = match self.bus.mounts.get(mnt) {
            Some(vol) => vol.drive,
            None => return Err(Errno::ENODEV.into()),
        };
        if let Err(rc) = self.engine.chdrive(drive) {
            error!("FATFS: Error change drive to - {}:", drive);
            return Err(rc.into());
        }
        Ok(drive)
    }

    fn l_block_size(&self, mnt: usize) -> OpResult<u8> {
        self.bus
            .mounts
            .get(mnt)
            .map(|vol| vol.router.l_block_size())
            .ok_or(OpError::Host(Errno::ENODEV))
    }

    fn open(&mut self, mnt: usize, path: &str, flags: OpenFlags) -> OpResult<Fd> {
        if self.bus.mounts.get(mnt).is_none() {
            error!("FATFS: Error, not mounted.");
            return Err(Errno::ENOMEM.into());
        }
        if self.handles.free_slot().is_none() {
            error!("FATFS: The maximum number of opened files exceeded.");
            return Err(Errno::ENFILE.into());
        }
        let drive = self.select_drive(mnt)?;
        let path = if path.is_empty() { "/" } else { path };

        if flags.contains(OpenFlags::DIR) {
            debug!("FATFS: Opening directory - {}:{}", drive, path);
            let dir = self.engine.opendir(&mut self.bus, path)?;
            return Ok(self.handles.insert(FileHandle::dir(dir, flags, mnt))?);
        }

        let Some(mode) = access_mode(flags) else {
            debug!("FATFS: Unknown flags 0x{:x}", flags.bits());
            return Err(Errno::EINVAL.into());
        };
        debug!("FATFS: Opening file - {}:{} 0x{:02x}", drive, path, mode.bits());

        let mut file = self.engine.open(&mut self.bus, path, mode)?;
        if mode.contains(AccessMode::WRITE) {
            if let Err(rc) = self.engine.sync(&mut self.bus, &mut file) {
                debug!("FATFS: sync after open: {}", rc.name());
            }
        }
        if flags.contains(OpenFlags::APPEND) {
            if let Some(pos) = append_position(file.size()) {
                debug!("FATFS: Append file at {}", pos);
                let target = SeekTarget::Offset(pos);
                if let Err(rc) = self.engine.lseek(&mut self.bus, &mut file, None, target) {
                    debug!("FATFS: append seek: {}", rc.name());
                }
            }
        }
        Ok(self.handles.insert(FileHandle::file(file, flags, mnt))?)
    }

    fn close(&mut self, fd: Fd) -> OpResult<()> {
        let handle = self.handles.take(fd)?;
        debug!("FATFS: Closing file - {}", fd);
        if handle.link_map.as_ref().is_some_and(LinkMap::is_heap) {
            debug!("FATFS: Freeing linktable");
        }
        match handle.obj {
            HandleObject::File(file) => self.engine.close(&mut self.bus, file)?,
            HandleObject::Dir(dir) => self.engine.closedir(dir)?,
        }
        Ok(())
    }

    fn read(&mut self, fd: Fd, buf: &mut [u8]) -> OpResult<usize> {
        let handle = self.handles.get_mut(fd)?;
        let cluster_bytes = self
            .bus
            .mounts
            .get(handle.mnt)
            .map_or(u64::MAX, |vol| vol.cluster_bytes());
        let read_only = handle.mode.access_mode() == OpenFlags::RDONLY.bits();
        let FileHandle { obj, link_map, .. } = handle;
        let HandleObject::File(file) = obj else {
            return Err(Errno::EISDIR.into());
        };

        if link_map.is_none() && read_only && file.size() as u64 > cluster_bytes {
            // A failed build only costs the fast-seek path.
            let _ = linkmap::build(self.engine, &mut self.bus, file, link_map);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        Ok(self.engine.read(&mut self.bus, file, link_map.as_deref(), buf)?)
    }

    fn write(&mut self, fd: Fd, buf: &[u8]) -> OpResult<usize> {
        let file = file_of(self.handles.get_mut(fd)?)?;
        Ok(self.engine.write(&mut self.bus, file, buf)?)
    }

    fn seek(&mut self, fd: Fd, offset: i64, whence: i32) -> OpResult<u64> {
        let handle = self.handles.get_mut(fd)?;
        let FileHandle { obj, link_map, .. } = handle;
        let HandleObject::File(file) = obj else {
            return Err(Errno::EISDIR.into());
        };
        let base = match SeekWhence::from_raw(whence) {
            Some(SeekWhence::Set) => 0,
            Some(SeekWhence::Cur) => file.tell() as i64,
            Some(SeekWhence::End) => file.size() as i64,
            None => return Err(Errno::EINVAL.into()),
        };
        let target = base
            .checked_add(offset)
            .and_then(|pos| u32::try_from(pos).ok())
            .ok_or(OpError::Host(Errno::EINVAL))?;

        let link_map = link_map.as_deref_mut();
        self.engine.lseek(&mut self.bus, file, link_map, SeekTarget::Offset(target))?;
        Ok(file.tell() as u64)
    }

    fn tell(&mut self, fd: Fd) -> OpResult<u64> {
        Ok(file_of(self.handles.get_mut(fd)?)?.tell() as u64)
    }

    fn total(&mut self, fd: Fd) -> OpResult<u64> {
        Ok(file_of(self.handles.get_mut(fd)?)?.size() as u64)
    }

    fn readdir(&mut self, fd: Fd) -> OpResult<Option<DirEntry>> {
        let handle = self.handles.get_mut(fd)?;
        let FileHandle { obj, dent, .. } = handle;
        let HandleObject::Dir(dir) = obj else {
            return Err(Errno::ENOTDIR.into());
        };
        *dent = DirEntry::default();

        let info = match self.engine.readdir(&mut self.bus, dir) {
            Ok(info) => info,
            Err(rc) => {
                debug!("FATFS: Error reading directory entry");
                return Err(rc.into());
            }
        };
        if info.fname.is_empty() {
            return Ok(None);
        }
        *dent = dir_entry(&info);
        Ok(Some(dent.clone()))
    }

    fn rewinddir(&mut self, fd: Fd) -> OpResult<()> {
        let handle = self.handles.get_mut(fd)?;
        let HandleObject::Dir(dir) = &mut handle.obj else {
            return Err(Errno::ENOTDIR.into());
        };
        Ok(self.engine.rewinddir(&mut self.bus, dir)?)
    }

    fn ioctl(&mut self, fd: Fd, req: Ioctl<'_>) -> OpResult<u64> {
        let handle = self.handles.get_mut(fd)?;
        let drive = match self.bus.mounts.get(handle.mnt) {
            Some(vol) => vol.drive,
            None => return Err(Errno::ENODEV.into()),
        };

        match req {
            Ioctl::BootSector(data) => {
                let len = self
                    .bus
                    .mounts
                    .get(handle.mnt)
                    .map_or(SECTOR_SIZE, |vol| vol.router.block_size() as usize);
                let Some(sector) = data.get_mut(..len) else {
                    return Err(Errno::EINVAL.into());
                };
                match self.bus.read(drive, sector, 0, 1) {
                    DResult::Ok => Ok(0),
                    _ => Err(Errno::EIO.into()),
                }
            }
            Ioctl::FileLba => {
                let file = file_of(handle)?;
                match self.engine.clust2sect(drive, file.start_cluster()) {
                    0 => Err(Errno::EIO.into()),
                    lba => Ok(lba),
                }
            }
            Ioctl::LinkMap(out) => {
                let FileHandle { obj, link_map, .. } = handle;
                let HandleObject::File(file) = obj else {
                    return Err(Errno::EISDIR.into());
                };
                let built = linkmap::build(self.engine, &mut self.bus, file, link_map);
                match (built, link_map.as_ref()) {
                    (Ok(()), Some(map)) => {
                        let used = map.used();
                        let Some(dst) = out.get_mut(..used) else {
                            return Err(Errno::ERANGE.into());
                        };
                        dst.copy_from_slice(&map[..used]);
                    }
                    _ => {
                        if let Some(first) = out.first_mut() {
                            *first = 0;
                        }
                    }
                }
                Ok(0)
            }
            Ioctl::Disk(cmd) => self
                .bus
                .ioctl(drive, cmd)
                .map_err(|_| OpError::Host(Errno::EIO)),
        }
    }

    fn rename(&mut self, mnt: usize, from: &str, to: &str) -> OpResult<()> {
        self.select_drive(mnt)?;
        Ok(self.engine.rename(&mut self.bus, from, to)?)
    }

    fn unlink(&mut self, mnt: usize, path: &str) -> OpResult<()> {
        self.select_drive(mnt)?;
        Ok(self.engine.unlink(&mut self.bus, path)?)
    }

    fn mkdir(&mut self, mnt: usize, path: &str) -> OpResult<()> {
        self.select_drive(mnt)?;
        Ok(self.engine.mkdir(&mut self.bus, path)?)
    }

    fn complete(&mut self, fd: Fd) -> OpResult<()> {
        debug!("FATFS: fs_complete");
        let file = file_of(self.handles.get_mut(fd)?)?;
        Ok(self.engine.sync(&mut self.bus, file)?)
    }

    fn fcntl(&mut self, fd: Fd, cmd: Fcntl) -> OpResult<i32> {
        let handle = self.handles.get(fd)?;
        match cmd {
            Fcntl::GetFl => Ok(handle.mode.bits() as i32),
            Fcntl::SetFl(_) | Fcntl::GetFd | Fcntl::SetFd(_) => Ok(0),
            Fcntl::Other(_) => Err(Errno::EINVAL.into()),
        }
    }

    fn stat(&mut self, mnt: usize, path: &str) -> OpResult<Stat> {
        let drive = self.select_drive(mnt)?;
        let mut st = Stat {
            st_dev: drive as u64 + 1,
            st_mode: mode_bits::S_IRX_ALL,
            st_nlink: 1,
            ..Stat::default()
        };

        if path.is_empty() || path == "/" {
            st.st_mode |= mode_bits::S_IFDIR;
            st.st_size = -1;
            return Ok(st);
        }

        let info = self.engine.stat(&mut self.bus, path)?;
        let mtime = unix_from_fat(info.fdate, info.ftime);
        st.st_atime = mtime;
        st.st_mtime = mtime;
        st.st_ctime = mtime;

        if info.is_dir() {
            st.st_mode |= mode_bits::S_IFDIR;
            st.st_size = -1;
        } else {
            let l = self.l_block_size(mnt)?;
            st.st_mode |= mode_bits::S_IFREG;
            st.st_size = info.fsize as i64;
            st.st_blksize = 1 << l;
            st.st_blocks = block_count(info.fsize as u64, l);
        }
        Ok(st)
    }

    fn fstat(&mut self, fd: Fd) -> OpResult<Stat> {
        let handle = self.handles.get(fd)?;
        let (drive, l) = match self.bus.mounts.get(handle.mnt) {
            Some(vol) => (vol.drive, vol.router.l_block_size()),
            None => return Err(Errno::ENODEV.into()),
        };
        let mut st = Stat {
            st_dev: drive as u64 + 1,
            st_mode: mode_bits::S_IRX_ALL,
            st_nlink: 1,
            st_blksize: 1 << l,
            ..Stat::default()
        };
        match &handle.obj {
            HandleObject::Dir(_) => {
                st.st_mode |= mode_bits::S_IFDIR;
                st.st_size = -1;
            }
            HandleObject::File(file) => {
                st.st_mode |= mode_bits::S_IFREG;
                st.st_size = file.size() as i64;
                st.st_blocks = block_count(file.size() as u64, l);
            }
        }
        Ok(st)
    }
}

/// Handler registered for one mounted volume
pub struct FatVfs<E: FatEngine, R: NameRegistry> {
    fs: Weak<FatFs<E, R>>,
    mnt: usize,
    /// Generation of the volume this handler was created for
    generation: u64,
}

impl<E: FatEngine, R: NameRegistry> FatVfs<E, R> {
    pub(crate) fn new(fs: Weak<FatFs<E, R>>, mnt: usize, generation: u64) -> Self {
        Self { fs, mnt, generation }
    }

    /// Mount slot this handler serves
    pub fn slot(&self) -> usize {
        self.mnt
    }

    fn with<T>(
        &self,
        op: &str,
        f: impl FnOnce(&mut OpCtx<'_, E>) -> OpResult<T>,
    ) -> Result<T, Errno> {
        let fs = self.fs.upgrade().ok_or(Errno::ENODEV)?;
        let mut st = fs.lock();
        // The slot was freed and reused by a later mount
        if st.mounts.get(self.mnt).is_some() && !st.mounts.is_current(self.mnt, self.generation) {
            error!("FATFS: {}: drive {} was remounted", op, self.mnt);
            return Err(st.fail(Errno::ENODEV));
        }
        st.run(op, f)
    }
}

impl<E: FatEngine, R: NameRegistry> VfsHandler for FatVfs<E, R> {
    fn open(&self, path: &str, flags: OpenFlags) -> Result<Fd, Errno> {
        self.with("open", |cx| cx.open(self.mnt, path, flags))
    }

    fn close(&self, fd: Fd) -> Result<(), Errno> {
        self.with("close", |cx| cx.close(fd))
    }

    fn read(&self, fd: Fd, buf: &mut [u8]) -> Result<usize, Errno> {
        self.with("read", |cx| cx.read(fd, buf))
    }

    fn write(&self, fd: Fd, buf: &[u8]) -> Result<usize, Errno> {
        self.with("write", |cx| cx.write(fd, buf))
    }

    fn seek(&self, fd: Fd, offset: i64, whence: i32) -> Result<u64, Errno> {
        self.with("seek", |cx| cx.seek(fd, offset, whence))
    }

    fn tell(&self, fd: Fd) -> Result<u64, Errno> {
        self.with("tell", |cx| cx.tell(fd))
    }

    fn total(&self, fd: Fd) -> Result<u64, Errno> {
        self.with("total", |cx| cx.total(fd))
    }

    fn readdir(&self, fd: Fd) -> Result<Option<DirEntry>, Errno> {
        self.with("readdir", |cx| cx.readdir(fd))
    }

    fn rewinddir(&self, fd: Fd) -> Result<(), Errno> {
        self.with("rewinddir", |cx| cx.rewinddir(fd))
    }

    fn ioctl(&self, fd: Fd, req: Ioctl<'_>) -> Result<u64, Errno> {
        self.with("ioctl", |cx| cx.ioctl(fd, req))
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), Errno> {
        self.with("rename", |cx| cx.rename(self.mnt, from, to))
    }

    fn unlink(&self, path: &str) -> Result<(), Errno> {
        self.with("unlink", |cx| cx.unlink(self.mnt, path))
    }

    fn mmap(&self, fd: Fd) -> Result<Vec<u8>, Errno> {
        self.with("mmap", |cx| {
            let size = cx.total(fd)? as usize;
            debug!("FATFS: Mmap {}", size);
            if size == 0 {
                return Err(Errno::EINVAL.into());
            }
            let mut data = Vec::new();
            if data.try_reserve_exact(size).is_err() {
                return Err(Errno::ENOMEM.into());
            }
            data.resize(size, 0);
            if cx.read(fd, &mut data)? != size {
                return Err(Errno::EIO.into());
            }
            Ok(data)
        })
    }

    fn complete(&self, fd: Fd) -> Result<(), Errno> {
        self.with("complete", |cx| cx.complete(fd))
    }

    fn stat(&self, path: &str, _flag: i32) -> Result<Stat, Errno> {
        self.with("stat", |cx| cx.stat(self.mnt, path))
    }

    fn fstat(&self, fd: Fd) -> Result<Stat, Errno> {
        self.with("fstat", |cx| cx.fstat(fd))
    }

    fn mkdir(&self, path: &str) -> Result<(), Errno> {
        self.with("mkdir", |cx| cx.mkdir(self.mnt, path))
    }

    /// Removes an empty directory the same way a file is unlinked
    fn rmdir(&self, path: &str) -> Result<(), Errno> {
        self.with("rmdir", |cx| cx.unlink(self.mnt, path))
    }

    fn fcntl(&self, fd: Fd, cmd: Fcntl) -> Result<i32, Errno> {
        self.with("fcntl", |cx| cx.fcntl(fd, cmd))
    }
}

impl<E: FatEngine, R: NameRegistry> core::fmt::Debug for FatVfs<E, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FatVfs").field("mnt", &self.mnt).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_access_modes() {
        assert_eq!(
            access_mode(OpenFlags::RDONLY),
            Some(AccessMode::OPEN_EXISTING | AccessMode::READ)
        );
        assert_eq!(
            access_mode(OpenFlags::WRONLY),
            Some(AccessMode::WRITE | AccessMode::CREATE_NEW)
        );
        assert_eq!(
            access_mode(OpenFlags::WRONLY | OpenFlags::TRUNC),
            Some(AccessMode::WRITE | AccessMode::CREATE_ALWAYS)
        );
        assert_eq!(
            access_mode(OpenFlags::RDWR | OpenFlags::TRUNC),
            Some(AccessMode::READ | AccessMode::WRITE | AccessMode::CREATE_ALWAYS)
        );
        assert_eq!(access_mode(OpenFlags::from_bits_retain(3)), None);
    }

    #[test]
    fn test_append_position_is_size_minus_one() {
        assert_eq!(append_position(0), None);
        assert_eq!(append_position(1), Some(0));
        assert_eq!(append_position(100), Some(99));
    }

    #[test]
    fn test_block_count() {
        assert_eq!(block_count(0, 9), 0);
        assert_eq!(block_count(512, 9), 1);
        assert_eq!(block_count(513, 9), 2);
    }

    #[test]
    fn test_dir_entry_names() {
        let mut info = FileInfo {
            fsize: 10,
            fname: "README.TXT".to_string(),
            ..FileInfo::default()
        };
        let entry = dir_entry(&info);
        assert_eq!(entry.name, "README.TXT");
        assert_eq!(entry.size, 10);
        assert!(!entry.is_dir());

        info.lfname = "readme.txt".to_string();
        info.fattrib = crate::fs::engine::FileAttr::DIRECTORY;
        let entry = dir_entry(&info);
        assert_eq!(entry.name, "readme.txt");
        assert_eq!(entry.size, -1);
        assert!(entry.is_dir());
    }
}
