//! FAT File System Service
//!
//! Owns the engine, the mount table and the handle pool behind a single
//! lock, and publishes every mounted volume to the host's name registry.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Host VFS: "/sd/DATA.BIN" -> FatVfs { mnt: 0 }       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 FatFs (spin::Mutex<FsState>)                 │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────┐            │
//! │  │ MountTable  │ │ HandlePool  │ │   errno     │            │
//! │  │  8 volumes  │ │  16 handles │ │   cell      │            │
//! │  └─────────────┘ └─────────────┘ └─────────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  FatEngine calls with a DiskBus
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                FAT engine (not reentrant)                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Mounting
//! 1. Take a free slot; its index becomes the logical drive number
//! 2. Initialise the PIO device (fatal) and the DMA device (optional)
//! 3. Mount the partition in the engine
//! 4. Allocate the DMA scratch buffer, report free space
//! 5. Register the volume's handler; any failure unwinds everything

pub mod adapter;
pub mod engine;
pub mod errno;
pub mod handle;
pub mod linkmap;
pub mod mount;
pub mod probe;
pub mod time;
pub mod vfs;

use alloc::boxed::Box;
use alloc::sync::Arc;

use log::{debug, error, info, warn};
use spin::{Mutex, MutexGuard};

pub use adapter::FatVfs;
pub use engine::{FResult, FatEngine};
pub use errno::Errno;
pub use mount::VolumeInfo;
pub use time::Clock;
pub use vfs::{DirEntry, Fd, Fcntl, Ioctl, OpenFlags, Stat, VfsHandler};

use self::engine::{DResult, DStatus, DiskCmd, DiskIo};
use self::errno::set_errno;
use self::handle::{HandleObject, HandlePool};
use self::mount::{MountTable, Volume};
use self::time::{fat_time_from_unix, NullClock};
use self::vfs::NameRegistry;
use crate::config::FsConfig;
use crate::io::block::BlockDevice;
use crate::io::router::DiskRouter;

/// Everything guarded by the filesystem lock
pub(crate) struct FsState<E: FatEngine, R> {
    pub(crate) initted: bool,
    pub(crate) engine: E,
    pub(crate) registry: R,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) config: FsConfig,
    /// Most recent error number
    pub(crate) errno: Errno,
    pub(crate) mounts: MountTable,
    pub(crate) handles: HandlePool<E::File, E::Dir>,
}

/// Disk callbacks for the engine, routed by logical drive number
pub(crate) struct DiskBus<'a> {
    pub(crate) mounts: &'a mut MountTable,
    pub(crate) errno: &'a mut Errno,
    pub(crate) clock: &'a dyn Clock,
}

impl DiskBus<'_> {
    fn router(&mut self, drive: u8) -> Option<&mut DiskRouter> {
        let router = self.mounts.router_mut(drive);
        if router.is_none() {
            debug!("FATFS: no volume on drive {}", drive);
        }
        router
    }
}

impl DiskIo for DiskBus<'_> {
    fn initialize(&mut self, drive: u8) -> DStatus {
        match self.router(drive) {
            Some(router) => router.initialize(),
            None => DStatus::NOINIT,
        }
    }

    fn status(&mut self, drive: u8) -> DStatus {
        match self.router(drive) {
            Some(router) => router.status(),
            None => DStatus::NOINIT,
        }
    }

    fn read(&mut self, drive: u8, buf: &mut [u8], sector: u64, count: u32) -> DResult {
        let Some(router) = self.router(drive) else {
            return DResult::Error;
        };
        match router.read(buf, sector, count) {
            Ok(()) => DResult::Ok,
            Err(status) => {
                error!("FATFS: disk_read[{}] {} +{}: {}", drive, sector, count, status);
                *self.errno = status.errno();
                status.dresult()
            }
        }
    }

    fn write(&mut self, drive: u8, buf: &[u8], sector: u64, count: u32) -> DResult {
        let Some(router) = self.router(drive) else {
            return DResult::Error;
        };
        match router.write(buf, sector, count) {
            Ok(()) => DResult::Ok,
            Err(status) => {
                error!("FATFS: disk_write[{}] {} +{}: {}", drive, sector, count, status);
                *self.errno = status.errno();
                status.dresult()
            }
        }
    }

    fn ioctl(&mut self, drive: u8, cmd: DiskCmd) -> Result<u64, DResult> {
        match self.router(drive) {
            Some(router) => router.ioctl(cmd),
            None => Err(DResult::ParErr),
        }
    }

    fn fat_time(&self) -> u32 {
        fat_time_from_unix(self.clock.unix_secs())
    }
}

impl<E: FatEngine, R: NameRegistry> FsState<E, R> {
    pub(crate) fn split(&mut self) -> (&mut E, DiskBus<'_>) {
        (
            &mut self.engine,
            DiskBus {
                mounts: &mut self.mounts,
                errno: &mut self.errno,
                clock: &*self.clock,
            },
        )
    }

    /// Record an engine failure and return the resulting error number
    pub(crate) fn engine_error(&mut self, op: &str, rc: FResult) -> Errno {
        debug!("FATFS: {}: {} FR_{}", op, rc as u8, rc.name());
        set_errno(&mut self.errno, rc);
        if !self.errno.is_err() {
            self.errno = Errno::EIO;
        }
        self.errno
    }

    pub(crate) fn fail(&mut self, errno: Errno) -> Errno {
        self.errno = errno;
        errno
    }

    /// Mount the engine on an installed slot and publish it
    fn attach(&mut self, drive: usize, handler: Arc<dyn VfsHandler>) -> Result<(), Errno> {
        let partition = match self.mounts.get(drive) {
            Some(vol) => vol.partition,
            None => return Err(self.fail(Errno::ENODEV)),
        };

        let res = {
            let (engine, mut bus) = self.split();
            engine.mount(&mut bus, drive as u8, partition)
        };
        let geometry = match res {
            Ok(geometry) => geometry,
            Err(rc) => {
                error!("FATFS: Mounting error: {}", rc.name());
                return Err(self.engine_error("mount", rc));
            }
        };

        let use_dma_buf = self.config.use_dma_buf;
        let Some(vol) = self.mounts.get_mut(drive) else {
            return Err(self.fail(Errno::ENODEV));
        };
        vol.geometry = Some(geometry);
        vol.router.set_cluster_sectors(geometry.csize);
        if use_dma_buf && vol.router.has_dma() && vol.router.attach_scratch() {
            debug!("FATFS: DMA buffer {} bytes", vol.cluster_bytes());
        }
        let sect_size = vol.router.block_size() as u64;
        let tot_sect = vol.router.count_blocks();
        let path = vol.path.clone();

        let free = {
            let (engine, mut bus) = self.split();
            engine.getfree(&mut bus, drive as u8)
        };
        match free {
            Ok(fre_clust) => {
                let fre_sect = fre_clust as u64 * geometry.csize as u64;
                debug!(
                    "FATFS: {} {:?}, {} MB total, {} MB free",
                    path,
                    geometry.fs_type,
                    (tot_sect * sect_size) >> 20,
                    (fre_sect * sect_size) >> 20
                );
            }
            Err(rc) => warn!("FATFS: Getting free space failed: {}", rc.name()),
        }
        debug!("FATFS: FAT start sector: {}", geometry.fatbase);
        debug!("FATFS: Data start sector: {}", geometry.database);
        debug!(
            "FATFS: Root directory start sector: {}",
            geometry.dirbase * geometry.csize as u64
        );

        if let Err(e) = self.registry.add(&path, Arc::clone(&handler)) {
            error!("FATFS: Couldn't add {} to name registry", path);
            return Err(self.fail(e));
        }
        if let Some(vol) = self.mounts.get_mut(drive) {
            vol.vfsh = Some(handler);
        }
        Ok(())
    }

    /// Undo everything a (possibly partial) mount did and free the slot
    fn release(&mut self, drive: usize) {
        let (path, registered, mounted) = match self.mounts.get(drive) {
            Some(vol) => (vol.path.clone(), vol.is_registered(), vol.geometry.is_some()),
            None => return,
        };

        if registered {
            if let Err(e) = self.registry.remove(&path) {
                warn!("FATFS: Couldn't remove {} from name registry: {}", path, e);
            }
        }
        if mounted {
            let (engine, mut bus) = self.split();
            if let Err(rc) = engine.unmount(&mut bus, drive as u8) {
                warn!("FATFS: Unmounting drive {}: {}", drive, rc.name());
            }
        }
        if let Some(mut vol) = self.mounts.take(drive) {
            vol.router.shutdown();
            debug!("FATFS: Released drive {} ({})", drive, vol.path);
        }
    }

    /// Close every open handle, ignoring engine errors
    fn close_all(&mut self) {
        let Self { engine, handles, mounts, errno, clock, .. } = self;
        let mut bus = DiskBus { mounts, errno, clock: &**clock };
        for handle in handles.drain() {
            let rc = match handle.obj {
                HandleObject::File(file) => engine.close(&mut bus, file),
                HandleObject::Dir(dir) => engine.closedir(dir),
            };
            if let Err(rc) = rc {
                warn!("FATFS: Closing handle at shutdown: {}", rc.name());
            }
        }
    }
}

/// The FAT filesystem service
pub struct FatFs<E: FatEngine, R: NameRegistry> {
    state: Mutex<FsState<E, R>>,
}

impl<E: FatEngine, R: NameRegistry> FatFs<E, R> {
    /// Create with default options and a clock stuck at the FAT epoch
    pub fn new(engine: E, registry: R) -> Self {
        Self::with_config(engine, registry, FsConfig::new(), Box::new(NullClock))
    }

    pub fn with_config(engine: E, registry: R, config: FsConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(FsState {
                initted: false,
                engine,
                registry,
                clock,
                config,
                errno: Errno::NONE,
                mounts: MountTable::new(),
                handles: HandlePool::new(),
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, FsState<E, R>> {
        self.state.lock()
    }

    /// Reset the mount table and handle pool. Idempotent.
    pub fn init(&self) -> Result<(), Errno> {
        let mut st = self.lock();
        if st.initted {
            return Ok(());
        }
        st.mounts = MountTable::new();
        st.handles = HandlePool::new();
        st.errno = Errno::NONE;
        st.initted = true;
        info!("FATFS: Initialized");
        Ok(())
    }

    /// Close all handles and unmount every volume
    pub fn shutdown(&self) -> Result<(), Errno> {
        let mut st = self.lock();
        if !st.initted {
            return Ok(());
        }
        st.close_all();
        let occupied: alloc::vec::Vec<usize> = st.mounts.occupied().collect();
        for drive in occupied {
            st.release(drive);
        }
        st.initted = false;
        info!("FATFS: Shut down");
        Ok(())
    }

    /// Mount `partition` of the device behind `pio` at `path`.
    ///
    /// `dma`, when given, must address the same medium. Returns the logical
    /// drive number.
    pub fn mount(
        self: &Arc<Self>,
        path: &str,
        pio: Box<dyn BlockDevice>,
        dma: Option<Box<dyn BlockDevice>>,
        partition: u8,
    ) -> Result<u8, Errno> {
        let mut st = self.lock();
        if !st.initted {
            error!("FATFS: Not initialized");
            return Err(st.fail(Errno::ENXIO));
        }
        st.errno = Errno::NONE;

        if st.mounts.find(path).is_some() {
            error!("FATFS: {} is already mounted", path);
            return Err(st.fail(Errno::EEXIST));
        }
        let Some(drive) = st.mounts.free_slot() else {
            error!("FATFS: The maximum number of mounts exceeded.");
            return Err(st.fail(Errno::ENFILE));
        };
        debug!("FATFS: Mounting {} as drive {} partition {}", path, drive, partition);

        let mut pio = pio;
        if let Err(e) = pio.init() {
            error!("FATFS: Can't initialize block device: {}", e);
            return Err(st.fail(e.errno()));
        }
        let dma = dma.and_then(|mut dev| match dev.init() {
            Ok(()) => Some(dev),
            Err(e) => {
                error!("FATFS: Can't initialize DMA block device: {}", e);
                None
            }
        });

        let router = DiskRouter::new(drive as u8, pio, dma, st.config.dma_write);
        let generation = st.mounts.install(Volume::new(drive as u8, path, partition, router));

        let handler: Arc<dyn VfsHandler> =
            Arc::new(FatVfs::new(Arc::downgrade(self), drive, generation));
        match st.attach(drive, handler) {
            Ok(()) => Ok(drive as u8),
            Err(e) => {
                st.release(drive);
                st.errno = e;
                Err(e)
            }
        }
    }

    /// Unpublish and unmount the volume at `path`
    pub fn unmount(&self, path: &str) -> Result<(), Errno> {
        let mut st = self.lock();
        match st.mounts.find_registered(path) {
            Some(drive) => {
                st.release(drive);
                Ok(())
            }
            None => Err(st.fail(Errno::ENOENT)),
        }
    }

    /// Slot index + 1 of the volume published at `path`, 0 if none
    pub fn is_mounted(&self, path: &str) -> usize {
        self.lock().mounts.find_registered(path).map_or(0, |slot| slot + 1)
    }

    /// Most recent error number
    pub fn errno(&self) -> Errno {
        self.lock().errno
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initted
    }

    /// Number of open files and directories
    pub fn open_handles(&self) -> usize {
        self.lock().handles.open_count()
    }

    pub fn volume_info(&self, path: &str) -> Option<VolumeInfo> {
        let st = self.lock();
        let slot = st.mounts.find_registered(path)?;
        st.mounts.get(slot).map(VolumeInfo::from)
    }

    pub fn volumes(&self) -> alloc::vec::Vec<VolumeInfo> {
        self.lock().mounts.iter().map(VolumeInfo::from).collect()
    }
}
