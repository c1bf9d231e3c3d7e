#![allow(dead_code)]

use std::sync::Arc;

use fatfs_vfs::config::FsConfig;
use fatfs_vfs::fs::time::{Clock, NullClock};
use fatfs_vfs::fs::vfs::{OpenFlags, VfsHandler};
use fatfs_vfs::fs::FatFs;
use fatfs_vfs::io::RamDisk;
use fatfs_vfs::mock::{format, SimEngine, SimFormat, SimProbe};
use fatfs_vfs::{Errno, Fd, MountNames};

pub type Fs = FatFs<SimEngine, Arc<MountNames>>;

/// 4 MB, 8192 sectors
pub const DISK_SIZE: usize = 4 * 1024 * 1024;
pub const DISK_SECTORS: u64 = (DISK_SIZE / 512) as u64;

pub struct Fixture {
    pub fs: Arc<Fs>,
    pub names: Arc<MountNames>,
    pub probe: Arc<SimProbe>,
    pub disk: RamDisk,
}

impl Fixture {
    /// Initialised service over an unpartitioned disk with 512-byte clusters
    pub fn new() -> Self {
        Self::build(SimEngine::new(), SimFormat::new(1), FsConfig::new(), Box::new(NullClock))
    }

    pub fn build(engine: SimEngine, fmt: SimFormat, config: FsConfig, clock: Box<dyn Clock>) -> Self {
        let disk = RamDisk::new(DISK_SIZE);
        format(&disk, 0, DISK_SECTORS, fmt).unwrap();
        let names = Arc::new(MountNames::new());
        let probe = engine.probe();
        let fs = Arc::new(FatFs::with_config(engine, Arc::clone(&names), config, clock));
        fs.init().unwrap();
        Self { fs, names, probe, disk }
    }

    /// Mount the fixture disk at `path` over PIO only
    pub fn mount(&self, path: &str) -> u8 {
        self.fs.mount(path, Box::new(self.disk.share()), None, 0).unwrap()
    }

    pub fn handler(&self, path: &str) -> Arc<dyn VfsHandler> {
        self.names.get(path).unwrap()
    }

    /// Mount at "/sd" and return its handler
    pub fn sd(&self) -> Arc<dyn VfsHandler> {
        self.mount("/sd");
        self.handler("/sd")
    }
}

/// Deterministic test data with no short period
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}

pub fn create(h: &dyn VfsHandler, path: &str) -> Result<Fd, Errno> {
    h.open(path, OpenFlags::WRONLY | OpenFlags::CREAT | OpenFlags::TRUNC)
}

pub fn write_file(h: &dyn VfsHandler, path: &str, data: &[u8]) {
    let fd = create(h, path).unwrap();
    assert_eq!(h.write(fd, data).unwrap(), data.len());
    h.close(fd).unwrap();
}

pub fn read_file(h: &dyn VfsHandler, path: &str) -> Vec<u8> {
    let fd = h.open(path, OpenFlags::RDONLY).unwrap();
    let mut out = Vec::new();
    let mut chunk = [0u8; 700];
    loop {
        let n = h.read(fd, &mut chunk).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    h.close(fd).unwrap();
    out
}
