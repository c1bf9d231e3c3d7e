//! FAT Engine Contract
//!
//! The on-disk FAT format is handled by an external, non-reentrant engine
//! with a FatFs-style API. This module fixes the shape of that engine as
//! seen from the adapter: result codes, open modes, directory records, and
//! the disk callbacks the engine uses to reach the block layer.
//!
//! ```text
//!   FatFs adapter ── FatEngine::read(io, file, ..) ──► engine
//!                                                        │
//!   DiskBus (router per drive) ◄── DiskIo::read(..) ─────┘
//! ```
//!
//! Every engine call that may touch the disk receives the [`DiskIo`] it must
//! use, so the engine never holds a reference into the mount table.

use alloc::string::String;

/// Engine result codes, numbered as in FatFs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FResult {
    Ok = 0,
    DiskErr = 1,
    IntErr = 2,
    NotReady = 3,
    NoFile = 4,
    NoPath = 5,
    InvalidName = 6,
    Denied = 7,
    Exist = 8,
    InvalidObject = 9,
    WriteProtected = 10,
    InvalidDrive = 11,
    NotEnabled = 12,
    NoFilesystem = 13,
    MkfsAborted = 14,
    Timeout = 15,
    Locked = 16,
    NotEnoughCore = 17,
    TooManyOpenFiles = 18,
    InvalidParameter = 19,
}

impl FResult {
    pub const fn from_code(code: u8) -> Option<Self> {
        let rc = match code {
            0 => Self::Ok,
            1 => Self::DiskErr,
            2 => Self::IntErr,
            3 => Self::NotReady,
            4 => Self::NoFile,
            5 => Self::NoPath,
            6 => Self::InvalidName,
            7 => Self::Denied,
            8 => Self::Exist,
            9 => Self::InvalidObject,
            10 => Self::WriteProtected,
            11 => Self::InvalidDrive,
            12 => Self::NotEnabled,
            13 => Self::NoFilesystem,
            14 => Self::MkfsAborted,
            15 => Self::Timeout,
            16 => Self::Locked,
            17 => Self::NotEnoughCore,
            18 => Self::TooManyOpenFiles,
            19 => Self::InvalidParameter,
            _ => return None,
        };
        Some(rc)
    }

    /// Name used in diagnostics ("FR_NO_FILE" without the prefix)
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::DiskErr => "DISK_ERR",
            Self::IntErr => "INT_ERR",
            Self::NotReady => "NOT_READY",
            Self::NoFile => "NO_FILE",
            Self::NoPath => "NO_PATH",
            Self::InvalidName => "INVALID_NAME",
            Self::Denied => "DENIED",
            Self::Exist => "EXIST",
            Self::InvalidObject => "INVALID_OBJECT",
            Self::WriteProtected => "WRITE_PROTECTED",
            Self::InvalidDrive => "INVALID_DRIVE",
            Self::NotEnabled => "NOT_ENABLED",
            Self::NoFilesystem => "NO_FILESYSTEM",
            Self::MkfsAborted => "MKFS_ABORTED",
            Self::Timeout => "TIMEOUT",
            Self::Locked => "LOCKED",
            Self::NotEnoughCore => "NOT_ENOUGH_CORE",
            Self::TooManyOpenFiles => "TOO_MANY_OPEN_FILES",
            Self::InvalidParameter => "INVALID_PARAMETER",
        }
    }
}

/// Disk callback results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DResult {
    Ok = 0,
    /// Unrecoverable device error
    Error = 1,
    /// Medium is write protected
    WrPrt = 2,
    /// Drive not initialized or not present
    NotRdy = 3,
    /// Bad parameter, including out-of-range sectors
    ParErr = 4,
}

bitflags::bitflags! {
    /// Disk status bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DStatus: u8 {
        /// Drive not initialized
        const NOINIT = 0x01;
        /// No medium in the drive
        const NODISK = 0x02;
        /// Medium is write protected
        const PROTECT = 0x04;
    }
}

bitflags::bitflags! {
    /// Engine open mode, numbered as FatFs `FA_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AccessMode: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
        /// Fail unless the file exists (no bits set)
        const OPEN_EXISTING = 0x00;
        /// Create; fail if the file exists
        const CREATE_NEW = 0x04;
        /// Create, truncating an existing file
        const CREATE_ALWAYS = 0x08;
        const OPEN_ALWAYS = 0x10;
    }
}

bitflags::bitflags! {
    /// FAT directory entry attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileAttr: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

/// Disk control command passed through to the drive.
///
/// Codes follow FatFs; anything the router does not know is rejected with a
/// parameter error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskCmd(pub u8);

impl DiskCmd {
    /// Flush pending writes
    pub const CTRL_SYNC: DiskCmd = DiskCmd(0);
    /// Number of sectors on the device
    pub const GET_SECTOR_COUNT: DiskCmd = DiskCmd(1);
    /// Sector size in bytes
    pub const GET_SECTOR_SIZE: DiskCmd = DiskCmd(2);
    /// Erase block size
    pub const GET_BLOCK_SIZE: DiskCmd = DiskCmd(3);
    /// Sectors no longer in use (accepted, nothing to do)
    pub const CTRL_TRIM: DiskCmd = DiskCmd(4);
}

/// Target of an engine seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekTarget {
    /// Absolute byte offset
    Offset(u32),
    /// Fill the supplied link map instead of moving
    CreateLinkMap,
}

/// FAT sub-type of a mounted volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

/// Layout facts reported by the engine after a successful mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeGeometry {
    pub fs_type: FatType,
    /// Sectors per cluster
    pub csize: u32,
    /// First FAT sector
    pub fatbase: u64,
    /// First data sector
    pub database: u64,
    /// Root directory sector (FAT12/16) or cluster (FAT32)
    pub dirbase: u64,
    /// Data clusters on the volume
    pub n_clusters: u32,
}

/// Directory record as returned by stat and readdir
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileInfo {
    pub fsize: u32,
    pub fdate: u16,
    pub ftime: u16,
    pub fattrib: FileAttr,
    /// 8.3 name, at most 12 characters; empty marks the end of a directory
    pub fname: String,
    /// Long file name, empty when the entry has none
    pub lfname: String,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.fattrib.contains(FileAttr::DIRECTORY)
    }
}

/// Disk callbacks the engine issues against a logical drive
pub trait DiskIo {
    fn initialize(&mut self, drive: u8) -> DStatus;
    fn status(&mut self, drive: u8) -> DStatus;
    fn read(&mut self, drive: u8, buf: &mut [u8], sector: u64, count: u32) -> DResult;
    fn write(&mut self, drive: u8, buf: &[u8], sector: u64, count: u32) -> DResult;
    fn ioctl(&mut self, drive: u8, cmd: DiskCmd) -> Result<u64, DResult>;
    /// Current time packed as a FAT timestamp
    fn fat_time(&self) -> u32;
}

/// Open file object owned by a handle
pub trait EngineFile {
    /// Current file size in bytes
    fn size(&self) -> u32;
    /// Current read/write position
    fn tell(&self) -> u32;
    /// First cluster of the file chain, 0 for an empty file
    fn start_cluster(&self) -> u32;
}

/// A FatFs-style engine.
///
/// The adapter serialises every call behind its own lock, so
/// implementations need no internal locking.
pub trait FatEngine: Send + 'static {
    type File: EngineFile + Send;
    type Dir: Send;

    /// Mount `partition` (0-based MBR slot) of `drive`
    fn mount(&mut self, io: &mut dyn DiskIo, drive: u8, partition: u8)
        -> Result<VolumeGeometry, FResult>;
    fn unmount(&mut self, io: &mut dyn DiskIo, drive: u8) -> Result<(), FResult>;
    /// Select the drive that relative paths resolve against
    fn chdrive(&mut self, drive: u8) -> Result<(), FResult>;
    /// Free clusters on `drive`
    fn getfree(&mut self, io: &mut dyn DiskIo, drive: u8) -> Result<u32, FResult>;

    fn open(&mut self, io: &mut dyn DiskIo, path: &str, mode: AccessMode)
        -> Result<Self::File, FResult>;
    fn close(&mut self, io: &mut dyn DiskIo, file: Self::File) -> Result<(), FResult>;
    /// Read at the current position. `link_map` is the table filled by a
    /// previous [`SeekTarget::CreateLinkMap`] seek, if any.
    fn read(
        &mut self,
        io: &mut dyn DiskIo,
        file: &mut Self::File,
        link_map: Option<&[u32]>,
        buf: &mut [u8],
    ) -> Result<usize, FResult>;
    fn write(&mut self, io: &mut dyn DiskIo, file: &mut Self::File, buf: &[u8])
        -> Result<usize, FResult>;
    /// Move the position, or fill `link_map` for [`SeekTarget::CreateLinkMap`].
    ///
    /// When filling, cell 0 holds the capacity on entry. If the chain needs
    /// more cells the engine stores the required count in cell 0 and fails
    /// with [`FResult::NotEnoughCore`].
    fn lseek(
        &mut self,
        io: &mut dyn DiskIo,
        file: &mut Self::File,
        link_map: Option<&mut [u32]>,
        target: SeekTarget,
    ) -> Result<(), FResult>;
    fn sync(&mut self, io: &mut dyn DiskIo, file: &mut Self::File) -> Result<(), FResult>;

    fn opendir(&mut self, io: &mut dyn DiskIo, path: &str) -> Result<Self::Dir, FResult>;
    fn closedir(&mut self, dir: Self::Dir) -> Result<(), FResult>;
    /// Next entry; an empty `fname` marks the end
    fn readdir(&mut self, io: &mut dyn DiskIo, dir: &mut Self::Dir) -> Result<FileInfo, FResult>;
    fn rewinddir(&mut self, io: &mut dyn DiskIo, dir: &mut Self::Dir) -> Result<(), FResult>;

    fn stat(&mut self, io: &mut dyn DiskIo, path: &str) -> Result<FileInfo, FResult>;
    fn rename(&mut self, io: &mut dyn DiskIo, from: &str, to: &str) -> Result<(), FResult>;
    fn unlink(&mut self, io: &mut dyn DiskIo, path: &str) -> Result<(), FResult>;
    fn mkdir(&mut self, io: &mut dyn DiskIo, path: &str) -> Result<(), FResult>;

    /// First sector of `cluster` on `drive`, 0 when the cluster is invalid
    fn clust2sect(&self, drive: u8, cluster: u32) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_codes() {
        for code in 0..=19u8 {
            let rc = FResult::from_code(code).unwrap();
            assert_eq!(rc as u8, code);
        }
        assert_eq!(FResult::from_code(20), None);
        assert_eq!(FResult::NotEnoughCore.name(), "NOT_ENOUGH_CORE");
    }

    #[test]
    fn test_access_mode_bits() {
        assert_eq!((AccessMode::WRITE | AccessMode::CREATE_NEW).bits(), 0x06);
        assert_eq!((AccessMode::READ | AccessMode::OPEN_EXISTING).bits(), 0x01);
    }
}
