//! Simulated FAT Engine
//!
//! A small FatFs-style engine that keeps its allocation table and a flat
//! catalog on the medium and moves every byte through [`DiskIo`], so the
//! adapter, the router and the block devices see real sector traffic.
//!
//! # Volume Layout
//! ```text
//!   base + 0            header ("SIMFAT01", type, csize, clusters, sizes)
//!   base + 1            allocation table, one u32 per cluster
//!   catbase             catalog: path-keyed records, zero terminated
//!   database            data clusters, numbered from 2
//! ```
//!
//! Clusters are handed out with a stride (2 by default), so a file grows
//! one fragment per cluster and link maps need `2 + 2 * clusters` cells.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use log::debug;

use crate::config::MAX_FAT_MOUNTS;
use crate::fs::engine::{
    AccessMode, DResult, DStatus, DiskCmd, DiskIo, EngineFile, FResult, FatEngine, FatType,
    FileAttr, FileInfo, SeekTarget, VolumeGeometry,
};
use crate::io::block::{BlockDevice, BlockStatus, SECTOR_SIZE};
use crate::io::disk::{scan_slot, write_table, MbrPartitionEntry, SlotScan};
use crate::io::ramdisk::RamDisk;

const MAGIC: &[u8; 8] = b"SIMFAT01";

/// Sectors reserved for the catalog
pub const CATALOG_SECTORS: u32 = 8;

const FAT_FREE: u32 = 0;
const FAT_EOC: u32 = 0x0FFF_FFFF;
const FAT_MEDIA: u32 = 0x0FFF_FFF8;

const ENTRY_END: u8 = 0;
const ENTRY_FILE: u8 = 1;
const ENTRY_DIR: u8 = 2;

/// Fixed part of a catalog record after the name
const RECORD_TAIL: usize = 12;

fn get_u16(buf: &[u8], off: usize) -> Option<u16> {
    buf.get(off..off + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn get_u32(buf: &[u8], off: usize) -> Option<u32> {
    buf.get(off..off + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn put_u32(buf: &mut [u8], off: usize, val: u32) {
    buf[off..off + 4].copy_from_slice(&val.to_le_bytes());
}

const fn fat_bits(fs_type: FatType) -> u32 {
    match fs_type {
        FatType::Fat12 => 12,
        FatType::Fat16 => 16,
        FatType::Fat32 => 32,
    }
}

const fn fat_type(bits: u32) -> Option<FatType> {
    match bits {
        12 => Some(FatType::Fat12),
        16 => Some(FatType::Fat16),
        32 => Some(FatType::Fat32),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    base: u64,
    fs_type: FatType,
    csize: u32,
    n_clusters: u32,
    fat_sectors: u32,
    cat_sectors: u32,
}

impl Layout {
    fn plan(base: u64, sectors: u64, csize: u32, fs_type: FatType, ssize: usize) -> Option<Self> {
        let csize = csize.max(1);
        let avail = sectors.checked_sub(1 + CATALOG_SECTORS as u64)?;
        let mut n_clusters = avail / csize as u64;
        let fat_sectors = loop {
            let fat_sectors = ((n_clusters + 2) * 4).div_ceil(ssize as u64);
            let fit = avail.checked_sub(fat_sectors)? / csize as u64;
            if fit >= n_clusters {
                break fat_sectors;
            }
            n_clusters = fit;
        };
        if n_clusters == 0 {
            return None;
        }
        Some(Self {
            base,
            fs_type,
            csize,
            n_clusters: u32::try_from(n_clusters).ok()?,
            fat_sectors: u32::try_from(fat_sectors).ok()?,
            cat_sectors: CATALOG_SECTORS,
        })
    }

    fn decode(base: u64, sector: &[u8]) -> Option<Self> {
        if sector.get(..MAGIC.len())? != MAGIC {
            return None;
        }
        Some(Self {
            base,
            fs_type: fat_type(get_u32(sector, 8)?)?,
            csize: get_u32(sector, 12)?,
            n_clusters: get_u32(sector, 16)?,
            fat_sectors: get_u32(sector, 20)?,
            cat_sectors: get_u32(sector, 24)?,
        })
    }

    fn encode(&self, sector: &mut [u8]) {
        sector[..MAGIC.len()].copy_from_slice(MAGIC);
        put_u32(sector, 8, fat_bits(self.fs_type));
        put_u32(sector, 12, self.csize);
        put_u32(sector, 16, self.n_clusters);
        put_u32(sector, 20, self.fat_sectors);
        put_u32(sector, 24, self.cat_sectors);
    }

    fn fatbase(&self) -> u64 {
        self.base + 1
    }

    fn catbase(&self) -> u64 {
        self.fatbase() + self.fat_sectors as u64
    }

    fn database(&self) -> u64 {
        self.catbase() + self.cat_sectors as u64
    }
}

/// Uppercase 8.3 form of a name
pub fn short_name(name: &str) -> String {
    let (base, ext) = match name.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() => (base, ext),
        _ => (name, ""),
    };
    let clean = |s: &str| -> String {
        s.chars()
            .filter(|c| !matches!(c, ' ' | '.'))
            .map(|c| c.to_ascii_uppercase())
            .collect()
    };
    let mut base = clean(base);
    if base.chars().count() > 8 {
        base = base.chars().take(6).collect::<String>() + "~1";
    }
    let ext: String = clean(ext).chars().take(3).collect();
    if ext.is_empty() {
        base
    } else {
        format!("{}.{}", base, ext)
    }
}

/// Canonical volume-relative form of `path`, "" for the root
fn normalize(path: &str) -> Result<String, FResult> {
    let mut parts: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            c if c
                .chars()
                .any(|ch| matches!(ch, '"' | '*' | ':' | '<' | '>' | '?' | '|' | '\\') || ch.is_control()) =>
            {
                return Err(FResult::InvalidName)
            }
            c => parts.push(c),
        }
    }
    Ok(parts.join("/"))
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

fn has_prefix(path: &str, prefix: &str) -> bool {
    path.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Cluster `index` of a chain according to a link map
pub fn map_cluster(map: &[u32], index: usize) -> Option<u32> {
    let mut rest = index as u64;
    for pair in map.get(1..)?.chunks_exact(2) {
        let (len, start) = (pair[0] as u64, pair[1]);
        if len == 0 {
            return None;
        }
        if rest < len {
            return Some(start + rest as u32);
        }
        rest -= len;
    }
    None
}

/// Runs of consecutive clusters as `(length, first)`
fn fragments(chain: &[u32]) -> Vec<(u32, u32)> {
    let mut frags: Vec<(u32, u32)> = Vec::new();
    for &clust in chain {
        match frags.last_mut() {
            Some((len, start)) if *start + *len == clust => *len += 1,
            _ => frags.push((1, clust)),
        }
    }
    frags
}

fn disk_read(io: &mut dyn DiskIo, drive: u8, buf: &mut [u8], sector: u64, count: u32) -> Result<(), FResult> {
    match io.read(drive, buf, sector, count) {
        DResult::Ok => Ok(()),
        _ => Err(FResult::DiskErr),
    }
}

fn disk_write(io: &mut dyn DiskIo, drive: u8, buf: &[u8], sector: u64, count: u32) -> Result<(), FResult> {
    match io.write(drive, buf, sector, count) {
        DResult::Ok => Ok(()),
        DResult::WrPrt => Err(FResult::WriteProtected),
        _ => Err(FResult::DiskErr),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SimEntry {
    path: String,
    dir: bool,
    size: u32,
    start: u32,
    fdate: u16,
    ftime: u16,
}

impl SimEntry {
    fn new(path: String, dir: bool, stamp: u32) -> Self {
        let mut entry = Self { path, dir, size: 0, start: 0, fdate: 0, ftime: 0 };
        entry.touch(stamp);
        entry
    }

    fn touch(&mut self, stamp: u32) {
        self.fdate = (stamp >> 16) as u16;
        self.ftime = stamp as u16;
    }

    fn name(&self) -> &str {
        self.path.rsplit_once('/').map_or(&self.path, |(_, name)| name)
    }

    fn info(&self) -> FileInfo {
        let name = self.name();
        let fname = short_name(name);
        let lfname = if fname == name { String::new() } else { name.to_string() };
        FileInfo {
            fsize: if self.dir { 0 } else { self.size },
            fdate: self.fdate,
            ftime: self.ftime,
            fattrib: if self.dir { FileAttr::DIRECTORY } else { FileAttr::ARCHIVE },
            fname,
            lfname,
        }
    }
}

fn encode_catalog(entries: &[SimEntry], capacity: usize) -> Result<Vec<u8>, FResult> {
    let mut out = Vec::with_capacity(capacity);
    for entry in entries {
        let name = entry.path.as_bytes();
        out.push(if entry.dir { ENTRY_DIR } else { ENTRY_FILE });
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&entry.size.to_le_bytes());
        out.extend_from_slice(&entry.start.to_le_bytes());
        out.extend_from_slice(&entry.fdate.to_le_bytes());
        out.extend_from_slice(&entry.ftime.to_le_bytes());
    }
    if out.len() >= capacity {
        debug!("simfat: catalog full ({} bytes)", out.len());
        return Err(FResult::Denied);
    }
    out.resize(capacity, ENTRY_END);
    Ok(out)
}

fn decode_catalog(buf: &[u8]) -> Result<Vec<SimEntry>, FResult> {
    let mut entries = Vec::new();
    let mut off = 0;
    loop {
        let kind = *buf.get(off).ok_or(FResult::IntErr)?;
        if kind == ENTRY_END {
            return Ok(entries);
        }
        let len = get_u16(buf, off + 1).ok_or(FResult::IntErr)? as usize;
        let name = buf.get(off + 3..off + 3 + len).ok_or(FResult::IntErr)?;
        let path = core::str::from_utf8(name).map_err(|_| FResult::IntErr)?;
        let rec = off + 3 + len;
        let field = |at: usize| get_u32(buf, rec + at).ok_or(FResult::IntErr);
        let half = |at: usize| get_u16(buf, rec + at).ok_or(FResult::IntErr);
        entries.push(SimEntry {
            path: path.to_string(),
            dir: kind == ENTRY_DIR,
            size: field(0)?,
            start: field(4)?,
            fdate: half(8)?,
            ftime: half(10)?,
        });
        off = rec + RECORD_TAIL;
    }
}

struct SimVolume {
    layout: Layout,
    ssize: usize,
    fat: Vec<u32>,
    entries: Vec<SimEntry>,
    dirty: bool,
}

impl SimVolume {
    fn load(io: &mut dyn DiskIo, drive: u8, layout: Layout, ssize: usize) -> Result<Self, FResult> {
        let mut raw = vec![0u8; layout.fat_sectors as usize * ssize];
        disk_read(io, drive, &mut raw, layout.fatbase(), layout.fat_sectors)?;
        let fat: Vec<u32> = raw
            .chunks_exact(4)
            .take(layout.n_clusters as usize + 2)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        if fat.len() != layout.n_clusters as usize + 2 {
            return Err(FResult::IntErr);
        }

        let mut raw = vec![0u8; layout.cat_sectors as usize * ssize];
        disk_read(io, drive, &mut raw, layout.catbase(), layout.cat_sectors)?;
        let entries = decode_catalog(&raw)?;

        Ok(Self { layout, ssize, fat, entries, dirty: false })
    }

    fn flush(&mut self, io: &mut dyn DiskIo, drive: u8) -> Result<(), FResult> {
        let mut raw = vec![0u8; self.layout.fat_sectors as usize * self.ssize];
        for (dst, clust) in raw.chunks_exact_mut(4).zip(&self.fat) {
            dst.copy_from_slice(&clust.to_le_bytes());
        }
        let catalog = encode_catalog(&self.entries, self.layout.cat_sectors as usize * self.ssize)?;
        disk_write(io, drive, &raw, self.layout.fatbase(), self.layout.fat_sectors)?;
        disk_write(io, drive, &catalog, self.layout.catbase(), self.layout.cat_sectors)?;
        self.dirty = false;
        Ok(())
    }

    fn cluster_bytes(&self) -> u64 {
        self.layout.csize as u64 * self.ssize as u64
    }

    fn valid(&self, clust: u32) -> bool {
        clust >= 2 && (clust as usize) < self.fat.len()
    }

    fn cluster_lba(&self, clust: u32) -> u64 {
        self.layout.database() + (clust as u64 - 2) * self.layout.csize as u64
    }

    fn free_clusters(&self) -> u32 {
        self.fat.iter().skip(2).filter(|&&c| c == FAT_FREE).count() as u32
    }

    fn chain(&self, start: u32) -> Result<Vec<u32>, FResult> {
        let mut chain = Vec::new();
        let mut clust = start;
        while clust != FAT_FREE && clust != FAT_EOC {
            if !self.valid(clust) || chain.len() >= self.fat.len() {
                return Err(FResult::IntErr);
            }
            chain.push(clust);
            clust = self.fat[clust as usize];
        }
        Ok(chain)
    }

    fn allocate(&mut self, prev: u32, stride: u32) -> Option<u32> {
        let end = self.fat.len() as u32;
        let hint = if prev == 0 { 2 } else { prev.saturating_add(stride) }.clamp(2, end);
        let clust = (hint..end)
            .chain(2..hint)
            .find(|&c| self.fat[c as usize] == FAT_FREE)?;
        self.fat[clust as usize] = FAT_EOC;
        if prev != 0 {
            self.fat[prev as usize] = clust;
        }
        self.dirty = true;
        Some(clust)
    }

    /// Extend the chain at `*start` to `clusters` clusters, as far as
    /// space allows; returns the resulting length
    fn grow(&mut self, start: &mut u32, clusters: usize, stride: u32) -> Result<usize, FResult> {
        let mut chain = self.chain(*start)?;
        while chain.len() < clusters {
            let prev = chain.last().copied().unwrap_or(0);
            let Some(clust) = self.allocate(prev, stride) else {
                debug!("simfat: volume full");
                break;
            };
            if chain.is_empty() {
                *start = clust;
            }
            chain.push(clust);
        }
        Ok(chain.len())
    }

    fn free_chain(&mut self, start: u32) {
        let mut clust = start;
        while self.valid(clust) {
            let next = self.fat[clust as usize];
            self.fat[clust as usize] = FAT_FREE;
            self.dirty = true;
            clust = next;
        }
    }

    fn find(&self, path: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.path.eq_ignore_ascii_case(path))
    }

    fn check_parent(&self, path: &str) -> Result<(), FResult> {
        let parent = parent_of(path);
        if parent.is_empty() {
            return Ok(());
        }
        match self.find(parent) {
            Some(i) if self.entries[i].dir => Ok(()),
            _ => Err(FResult::NoPath),
        }
    }

    fn children<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = &'a SimEntry> + 'a {
        self.entries
            .iter()
            .filter(move |e| parent_of(&e.path).eq_ignore_ascii_case(dir))
    }

    fn cluster_at(chain: &[u32], map: Option<&[u32]>, index: usize) -> Result<u32, FResult> {
        let clust = *chain.get(index).ok_or(FResult::IntErr)?;
        match map {
            Some(map) if map_cluster(map, index) != Some(clust) => Err(FResult::IntErr),
            _ => Ok(clust),
        }
    }

    fn read_data(
        &self,
        io: &mut dyn DiskIo,
        drive: u8,
        chain: &[u32],
        map: Option<&[u32]>,
        pos: u32,
        buf: &mut [u8],
    ) -> Result<(), FResult> {
        let cbytes = self.cluster_bytes();
        let ssize = self.ssize;
        let mut done = 0;
        while done < buf.len() {
            let at = pos as u64 + done as u64;
            let clust = Self::cluster_at(chain, map, (at / cbytes) as usize)?;
            let off = at % cbytes;
            let sector = self.cluster_lba(clust) + off / ssize as u64;
            let soff = (off % ssize as u64) as usize;
            let span = (buf.len() - done).min((cbytes - off) as usize);

            if soff == 0 && span >= ssize {
                let count = span / ssize;
                let bytes = count * ssize;
                disk_read(io, drive, &mut buf[done..done + bytes], sector, count as u32)?;
                done += bytes;
            } else {
                let take = span.min(ssize - soff);
                let mut tmp = vec![0u8; ssize];
                disk_read(io, drive, &mut tmp, sector, 1)?;
                buf[done..done + take].copy_from_slice(&tmp[soff..soff + take]);
                done += take;
            }
        }
        Ok(())
    }

    fn write_data(
        &self,
        io: &mut dyn DiskIo,
        drive: u8,
        chain: &[u32],
        pos: u32,
        buf: &[u8],
    ) -> Result<(), FResult> {
        let cbytes = self.cluster_bytes();
        let ssize = self.ssize;
        let mut done = 0;
        while done < buf.len() {
            let at = pos as u64 + done as u64;
            let clust = Self::cluster_at(chain, None, (at / cbytes) as usize)?;
            let off = at % cbytes;
            let sector = self.cluster_lba(clust) + off / ssize as u64;
            let soff = (off % ssize as u64) as usize;
            let span = (buf.len() - done).min((cbytes - off) as usize);

            if soff == 0 && span >= ssize {
                let count = span / ssize;
                let bytes = count * ssize;
                disk_write(io, drive, &buf[done..done + bytes], sector, count as u32)?;
                done += bytes;
            } else {
                let take = span.min(ssize - soff);
                let mut tmp = vec![0u8; ssize];
                disk_read(io, drive, &mut tmp, sector, 1)?;
                tmp[soff..soff + take].copy_from_slice(&buf[done..done + take]);
                disk_write(io, drive, &tmp, sector, 1)?;
                done += take;
            }
        }
        Ok(())
    }
}

/// Call counters shared with the test that owns the engine
#[derive(Debug, Default)]
pub struct SimProbe {
    pub mounts: AtomicUsize,
    pub unmounts: AtomicUsize,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub syncs: AtomicUsize,
    /// CreateLinkMap seeks
    pub link_map_requests: AtomicUsize,
    /// CreateLinkMap seeks refused for lack of cells
    pub link_map_short: AtomicUsize,
    /// Offset seeks served from a link map
    pub fast_seeks: AtomicUsize,
    /// Reads served from a link map
    pub fast_seek_reads: AtomicUsize,
}

impl SimProbe {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::Relaxed)
    }
}

/// Open file
#[derive(Debug)]
pub struct SimFile {
    drive: u8,
    path: String,
    mode: AccessMode,
    pos: u32,
    size: u32,
    start: u32,
    dirty: bool,
}

impl EngineFile for SimFile {
    fn size(&self) -> u32 {
        self.size
    }

    fn tell(&self) -> u32 {
        self.pos
    }

    fn start_cluster(&self) -> u32 {
        self.start
    }
}

/// Open directory
#[derive(Debug)]
pub struct SimDir {
    drive: u8,
    path: String,
    index: usize,
}

/// Geometry for [`format`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimFormat {
    /// Sectors per cluster
    pub csize: u32,
    pub fs_type: FatType,
}

impl SimFormat {
    pub const fn new(csize: u32) -> Self {
        Self { csize, fs_type: FatType::Fat32 }
    }
}

impl Default for SimFormat {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Lay down an empty volume of `sectors` sectors at `start_lba`
pub fn format(disk: &RamDisk, start_lba: u64, sectors: u64, fmt: SimFormat) -> Result<(), BlockStatus> {
    let l = disk.l_block_size();
    let ssize = 1usize << l;
    let layout = Layout::plan(start_lba, sectors, fmt.csize, fmt.fs_type, ssize)
        .ok_or(BlockStatus::InvalidParameter)?;

    let mut header = vec![0u8; ssize];
    layout.encode(&mut header);
    disk.load((layout.base as usize) << l, &header)?;

    let mut fat = vec![0u8; layout.fat_sectors as usize * ssize];
    put_u32(&mut fat, 0, FAT_MEDIA);
    put_u32(&mut fat, 4, FAT_EOC);
    disk.load((layout.fatbase() as usize) << l, &fat)?;

    let catalog = vec![ENTRY_END; layout.cat_sectors as usize * ssize];
    disk.load((layout.catbase() as usize) << l, &catalog)?;

    debug!(
        "simfat: formatted {} clusters of {} sectors at {}",
        layout.n_clusters, layout.csize, start_lba
    );
    Ok(())
}

/// Write an MBR holding `entries` to sector 0
pub fn write_mbr(disk: &RamDisk, entries: &[MbrPartitionEntry]) -> Result<(), BlockStatus> {
    let mut sector = [0u8; SECTOR_SIZE];
    write_table(&mut sector, entries);
    disk.load(0, &sector)
}

/// The simulated engine
pub struct SimEngine {
    volumes: [Option<SimVolume>; MAX_FAT_MOUNTS],
    current: u8,
    stride: u32,
    probe: Arc<SimProbe>,
}

impl SimEngine {
    pub fn new() -> Self {
        Self::with_stride(2)
    }

    /// Allocate each new cluster `stride` clusters after the previous one;
    /// 1 keeps files contiguous
    pub fn with_stride(stride: u32) -> Self {
        Self {
            volumes: core::array::from_fn(|_| None),
            current: 0,
            stride: stride.max(1),
            probe: Arc::new(SimProbe::default()),
        }
    }

    pub fn probe(&self) -> Arc<SimProbe> {
        Arc::clone(&self.probe)
    }

    fn vol(volumes: &[Option<SimVolume>], drive: u8) -> Result<&SimVolume, FResult> {
        volumes
            .get(drive as usize)
            .and_then(Option::as_ref)
            .ok_or(FResult::NotEnabled)
    }

    fn vol_mut(volumes: &mut [Option<SimVolume>], drive: u8) -> Result<&mut SimVolume, FResult> {
        volumes
            .get_mut(drive as usize)
            .and_then(Option::as_mut)
            .ok_or(FResult::NotEnabled)
    }
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FatEngine for SimEngine {
    type File = SimFile;
    type Dir = SimDir;

    fn mount(&mut self, io: &mut dyn DiskIo, drive: u8, partition: u8) -> Result<VolumeGeometry, FResult> {
        let slot = drive as usize;
        if slot >= MAX_FAT_MOUNTS {
            return Err(FResult::InvalidDrive);
        }
        if io.initialize(drive).contains(DStatus::NOINIT) {
            return Err(FResult::NotReady);
        }
        let ssize = io
            .ioctl(drive, DiskCmd::GET_SECTOR_SIZE)
            .map_err(|_| FResult::DiskErr)? as usize;
        if ssize < SECTOR_SIZE {
            return Err(FResult::NoFilesystem);
        }

        let mut sector = vec![0u8; ssize];
        disk_read(io, drive, &mut sector, 0, 1)?;
        let mut mbr = [0u8; SECTOR_SIZE];
        mbr.copy_from_slice(&sector[..SECTOR_SIZE]);
        let base = match scan_slot(&mbr, drive, partition as usize) {
            SlotScan::Present(desc) => desc.entry.start_lba as u64,
            SlotScan::NoMbr if partition == 0 => 0,
            _ => return Err(FResult::NoFilesystem),
        };

        disk_read(io, drive, &mut sector, base, 1)?;
        let layout = Layout::decode(base, &sector).ok_or(FResult::NoFilesystem)?;
        let vol = SimVolume::load(io, drive, layout, ssize)?;
        debug!(
            "simfat: drive {} mounted at {}, {} entries",
            drive,
            base,
            vol.entries.len()
        );
        self.volumes[slot] = Some(vol);
        SimProbe::bump(&self.probe.mounts);

        Ok(VolumeGeometry {
            fs_type: layout.fs_type,
            csize: layout.csize,
            fatbase: layout.fatbase(),
            database: layout.database(),
            dirbase: layout.catbase(),
            n_clusters: layout.n_clusters,
        })
    }

    fn unmount(&mut self, io: &mut dyn DiskIo, drive: u8) -> Result<(), FResult> {
        let Some(slot) = self.volumes.get_mut(drive as usize) else {
            return Err(FResult::InvalidDrive);
        };
        SimProbe::bump(&self.probe.unmounts);
        match slot.take() {
            Some(mut vol) if vol.dirty => vol.flush(io, drive),
            _ => Ok(()),
        }
    }

    fn chdrive(&mut self, drive: u8) -> Result<(), FResult> {
        if drive as usize >= MAX_FAT_MOUNTS {
            return Err(FResult::InvalidDrive);
        }
        self.current = drive;
        Ok(())
    }

    fn getfree(&mut self, _io: &mut dyn DiskIo, drive: u8) -> Result<u32, FResult> {
        Ok(Self::vol(&self.volumes, drive)?.free_clusters())
    }

    fn open(&mut self, io: &mut dyn DiskIo, path: &str, mode: AccessMode) -> Result<SimFile, FResult> {
        SimProbe::bump(&self.probe.opens);
        let drive = self.current;
        let stamp = io.fat_time();
        let vol = Self::vol_mut(&mut self.volumes, drive)?;
        let path = normalize(path)?;
        if path.is_empty() {
            return Err(FResult::InvalidName);
        }
        let create = mode.intersects(AccessMode::CREATE_NEW | AccessMode::CREATE_ALWAYS | AccessMode::OPEN_ALWAYS);

        let idx = match vol.find(&path) {
            Some(i) => {
                if mode.contains(AccessMode::CREATE_NEW) {
                    return Err(FResult::Exist);
                }
                if vol.entries[i].dir {
                    return Err(if create { FResult::Denied } else { FResult::NoFile });
                }
                if mode.contains(AccessMode::CREATE_ALWAYS) {
                    let start = vol.entries[i].start;
                    vol.free_chain(start);
                    let entry = &mut vol.entries[i];
                    entry.size = 0;
                    entry.start = 0;
                    entry.touch(stamp);
                    vol.dirty = true;
                }
                i
            }
            None => {
                vol.check_parent(&path)?;
                if !create {
                    return Err(FResult::NoFile);
                }
                vol.entries.push(SimEntry::new(path, false, stamp));
                vol.dirty = true;
                vol.entries.len() - 1
            }
        };

        let entry = &vol.entries[idx];
        Ok(SimFile {
            drive,
            path: entry.path.clone(),
            mode,
            pos: 0,
            size: entry.size,
            start: entry.start,
            dirty: false,
        })
    }

    fn close(&mut self, io: &mut dyn DiskIo, file: SimFile) -> Result<(), FResult> {
        SimProbe::bump(&self.probe.closes);
        let mut file = file;
        if file.mode.contains(AccessMode::WRITE) {
            self.sync(io, &mut file)?;
        }
        Ok(())
    }

    fn read(
        &mut self,
        io: &mut dyn DiskIo,
        file: &mut SimFile,
        link_map: Option<&[u32]>,
        buf: &mut [u8],
    ) -> Result<usize, FResult> {
        if !file.mode.contains(AccessMode::READ) {
            return Err(FResult::Denied);
        }
        if link_map.is_some() {
            SimProbe::bump(&self.probe.fast_seek_reads);
        }
        let vol = Self::vol(&self.volumes, file.drive)?;
        let n = buf.len().min(file.size.saturating_sub(file.pos) as usize);
        if n == 0 {
            return Ok(0);
        }
        let chain = vol.chain(file.start)?;
        vol.read_data(io, file.drive, &chain, link_map, file.pos, &mut buf[..n])?;
        file.pos += n as u32;
        Ok(n)
    }

    fn write(&mut self, io: &mut dyn DiskIo, file: &mut SimFile, buf: &[u8]) -> Result<usize, FResult> {
        if !file.mode.contains(AccessMode::WRITE) {
            return Err(FResult::Denied);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let stride = self.stride;
        let vol = Self::vol_mut(&mut self.volumes, file.drive)?;
        let cbytes = vol.cluster_bytes();
        let end = (file.pos as u64 + buf.len() as u64).min(u32::MAX as u64);
        let have = vol.grow(&mut file.start, end.div_ceil(cbytes) as usize, stride)?;
        file.dirty = true;

        let end = end.min(have as u64 * cbytes);
        if end <= file.pos as u64 {
            return Ok(0);
        }
        let n = (end - file.pos as u64) as usize;
        let chain = vol.chain(file.start)?;
        vol.write_data(io, file.drive, &chain, file.pos, &buf[..n])?;
        file.pos += n as u32;
        file.size = file.size.max(file.pos);
        Ok(n)
    }

    fn lseek(
        &mut self,
        _io: &mut dyn DiskIo,
        file: &mut SimFile,
        link_map: Option<&mut [u32]>,
        target: SeekTarget,
    ) -> Result<(), FResult> {
        let stride = self.stride;
        match target {
            SeekTarget::CreateLinkMap => {
                SimProbe::bump(&self.probe.link_map_requests);
                let map = link_map.ok_or(FResult::InvalidParameter)?;
                let vol = Self::vol(&self.volumes, file.drive)?;
                let frags = fragments(&vol.chain(file.start)?);
                let need = 2 + 2 * frags.len();
                let cap = map.first().map_or(0, |&c| c as usize).min(map.len());
                if need > cap {
                    if let Some(first) = map.first_mut() {
                        *first = need as u32;
                    }
                    SimProbe::bump(&self.probe.link_map_short);
                    return Err(FResult::NotEnoughCore);
                }
                map[0] = need as u32;
                for (i, (len, start)) in frags.iter().enumerate() {
                    map[1 + 2 * i] = *len;
                    map[2 + 2 * i] = *start;
                }
                map[need - 1] = 0;
                Ok(())
            }
            SeekTarget::Offset(pos) => {
                let vol = Self::vol_mut(&mut self.volumes, file.drive)?;
                let cbytes = vol.cluster_bytes();
                if let Some(map) = link_map.as_deref() {
                    SimProbe::bump(&self.probe.fast_seeks);
                    if pos < file.size {
                        let chain = vol.chain(file.start)?;
                        SimVolume::cluster_at(&chain, Some(map), (pos as u64 / cbytes) as usize)?;
                    }
                }

                let mut pos = pos;
                if pos > file.size {
                    if file.mode.contains(AccessMode::WRITE) {
                        let have = vol.grow(&mut file.start, (pos as u64).div_ceil(cbytes) as usize, stride)?;
                        pos = pos.min((have as u64 * cbytes).min(u32::MAX as u64) as u32);
                        file.size = pos;
                        file.dirty = true;
                    } else {
                        pos = file.size;
                    }
                }
                file.pos = pos;
                Ok(())
            }
        }
    }

    fn sync(&mut self, io: &mut dyn DiskIo, file: &mut SimFile) -> Result<(), FResult> {
        SimProbe::bump(&self.probe.syncs);
        let stamp = io.fat_time();
        let vol = Self::vol_mut(&mut self.volumes, file.drive)?;
        if file.dirty {
            if let Some(i) = vol.find(&file.path) {
                let entry = &mut vol.entries[i];
                entry.size = file.size;
                entry.start = file.start;
                entry.touch(stamp);
                vol.dirty = true;
            }
            file.dirty = false;
        }
        if vol.dirty {
            vol.flush(io, file.drive)?;
        }
        io.ioctl(file.drive, DiskCmd::CTRL_SYNC)
            .map(|_| ())
            .map_err(|_| FResult::DiskErr)
    }

    fn opendir(&mut self, _io: &mut dyn DiskIo, path: &str) -> Result<SimDir, FResult> {
        let drive = self.current;
        let vol = Self::vol(&self.volumes, drive)?;
        let path = normalize(path)?;
        if !path.is_empty() {
            match vol.find(&path) {
                Some(i) if vol.entries[i].dir => {}
                _ => return Err(FResult::NoPath),
            }
        }
        Ok(SimDir { drive, path, index: 0 })
    }

    fn closedir(&mut self, _dir: SimDir) -> Result<(), FResult> {
        Ok(())
    }

    fn readdir(&mut self, _io: &mut dyn DiskIo, dir: &mut SimDir) -> Result<FileInfo, FResult> {
        let vol = Self::vol(&self.volumes, dir.drive)?;
        let info = vol.children(&dir.path).nth(dir.index).map(SimEntry::info);
        match info {
            Some(info) => {
                dir.index += 1;
                Ok(info)
            }
            None => Ok(FileInfo::default()),
        }
    }

    fn rewinddir(&mut self, _io: &mut dyn DiskIo, dir: &mut SimDir) -> Result<(), FResult> {
        dir.index = 0;
        Ok(())
    }

    fn stat(&mut self, _io: &mut dyn DiskIo, path: &str) -> Result<FileInfo, FResult> {
        let vol = Self::vol(&self.volumes, self.current)?;
        let path = normalize(path)?;
        if path.is_empty() {
            return Err(FResult::InvalidName);
        }
        match vol.find(&path) {
            Some(i) => Ok(vol.entries[i].info()),
            None => {
                vol.check_parent(&path)?;
                Err(FResult::NoFile)
            }
        }
    }

    fn rename(&mut self, io: &mut dyn DiskIo, from: &str, to: &str) -> Result<(), FResult> {
        let drive = self.current;
        let vol = Self::vol_mut(&mut self.volumes, drive)?;
        let from = normalize(from)?;
        let to = normalize(to)?;
        if from.is_empty() || to.is_empty() {
            return Err(FResult::InvalidName);
        }
        let Some(i) = vol.find(&from) else {
            vol.check_parent(&from)?;
            return Err(FResult::NoFile);
        };
        if vol.find(&to).is_some() {
            return Err(FResult::Exist);
        }
        vol.check_parent(&to)?;

        let old = vol.entries[i].path.clone();
        let prefix = format!("{}/", old);
        if vol.entries[i].dir && has_prefix(&to, &prefix) {
            return Err(FResult::InvalidName);
        }
        for entry in vol.entries.iter_mut() {
            if entry.path.eq_ignore_ascii_case(&old) {
                entry.path = to.clone();
            } else if has_prefix(&entry.path, &prefix) {
                entry.path = format!("{}/{}", to, &entry.path[prefix.len()..]);
            }
        }
        vol.dirty = true;
        vol.flush(io, drive)
    }

    fn unlink(&mut self, io: &mut dyn DiskIo, path: &str) -> Result<(), FResult> {
        let drive = self.current;
        let vol = Self::vol_mut(&mut self.volumes, drive)?;
        let path = normalize(path)?;
        if path.is_empty() {
            return Err(FResult::InvalidName);
        }
        let Some(i) = vol.find(&path) else {
            vol.check_parent(&path)?;
            return Err(FResult::NoFile);
        };
        if vol.entries[i].dir && vol.children(&path).next().is_some() {
            return Err(FResult::Denied);
        }
        let entry = vol.entries.remove(i);
        vol.free_chain(entry.start);
        vol.dirty = true;
        vol.flush(io, drive)
    }

    fn mkdir(&mut self, io: &mut dyn DiskIo, path: &str) -> Result<(), FResult> {
        let drive = self.current;
        let stamp = io.fat_time();
        let vol = Self::vol_mut(&mut self.volumes, drive)?;
        let path = normalize(path)?;
        if path.is_empty() {
            return Err(FResult::InvalidName);
        }
        if vol.find(&path).is_some() {
            return Err(FResult::Exist);
        }
        vol.check_parent(&path)?;
        vol.entries.push(SimEntry::new(path, true, stamp));
        vol.dirty = true;
        vol.flush(io, drive)
    }

    fn clust2sect(&self, drive: u8, cluster: u32) -> u64 {
        match Self::vol(&self.volumes, drive) {
            Ok(vol) if vol.valid(cluster) => vol.cluster_lba(cluster),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names() {
        assert_eq!(short_name("README.TXT"), "README.TXT");
        assert_eq!(short_name("readme.txt"), "README.TXT");
        assert_eq!(short_name("Long File Name.data"), "LONGFI~1.DAT");
        assert_eq!(short_name("DIR"), "DIR");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/a//b/./c").unwrap(), "a/b/c");
        assert_eq!(normalize("/a/../b").unwrap(), "b");
        assert_eq!(normalize("/").unwrap(), "");
        assert_eq!(normalize("/bad?name"), Err(FResult::InvalidName));
    }

    #[test]
    fn test_fragments_and_map() {
        let chain = [2, 3, 4, 8, 10, 11];
        let frags = fragments(&chain);
        assert_eq!(frags, vec![(3, 2), (1, 8), (2, 10)]);

        let map = [8, 3, 2, 1, 8, 2, 10, 0];
        for (i, &clust) in chain.iter().enumerate() {
            assert_eq!(map_cluster(&map, i), Some(clust));
        }
        assert_eq!(map_cluster(&map, 6), None);
    }

    #[test]
    fn test_layout_fits() {
        let layout = Layout::plan(63, 8192, 4, FatType::Fat32, 512).unwrap();
        let used = 1
            + layout.fat_sectors as u64
            + layout.cat_sectors as u64
            + layout.n_clusters as u64 * layout.csize as u64;
        assert!(used <= 8192);
        assert!((layout.n_clusters as u64 + 2) * 4 <= layout.fat_sectors as u64 * 512);
        assert_eq!(layout.database(), 63 + 1 + layout.fat_sectors as u64 + CATALOG_SECTORS as u64);

        let mut sector = [0u8; 512];
        layout.encode(&mut sector);
        assert_eq!(Layout::decode(63, &sector), Some(layout));
        assert_eq!(Layout::decode(63, &[0u8; 512]), None);
    }

    #[test]
    fn test_catalog_encoding() {
        let entries = vec![
            SimEntry::new("DIR".to_string(), true, 0x0021_0000),
            SimEntry { size: 700, start: 5, ..SimEntry::new("DIR/data.bin".to_string(), false, 0) },
        ];
        let raw = encode_catalog(&entries, 512).unwrap();
        assert_eq!(raw.len(), 512);
        assert_eq!(decode_catalog(&raw).unwrap(), entries);
        assert_eq!(encode_catalog(&entries, 16), Err(FResult::Denied));
    }
}
