//! Cluster Link Maps
//!
//! A link map is the engine's fast-seek table: a run-length list of the
//! file's cluster chain, so seeking does not have to walk the FAT.
//!
//! ```text
//!   [ used | len0 start0 | len1 start1 | ... | 0 ]
//! ```
//!
//! Every handle has room for [`FATFS_LINK_TBL_SIZE`] cells inline. A file
//! fragmented past that gets a heap table sized from the engine's answer,
//! after exactly one retry.

use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};

use log::{debug, error};

use super::engine::{DiskIo, FResult, FatEngine, SeekTarget};
use crate::config::FATFS_LINK_TBL_SIZE;

/// Built link map owned by a handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkMap {
    Inline([u32; FATFS_LINK_TBL_SIZE]),
    Heap(Vec<u32>),
}

impl LinkMap {
    pub fn is_heap(&self) -> bool {
        matches!(self, Self::Heap(_))
    }

    /// Cells in use, as recorded by the engine in cell 0
    pub fn used(&self) -> usize {
        (self[0] as usize).min(self.len())
    }
}

impl Deref for LinkMap {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        match self {
            Self::Inline(cells) => cells,
            Self::Heap(cells) => cells,
        }
    }
}

impl DerefMut for LinkMap {
    fn deref_mut(&mut self) -> &mut [u32] {
        match self {
            Self::Inline(cells) => cells,
            Self::Heap(cells) => cells,
        }
    }
}

/// Build the link map for `file` into `slot` unless one already exists.
///
/// On failure `slot` is left empty and the engine's result is returned.
pub fn build<E: FatEngine>(
    engine: &mut E,
    io: &mut dyn DiskIo,
    file: &mut E::File,
    slot: &mut Option<LinkMap>,
) -> Result<(), FResult> {
    if slot.is_some() {
        return Ok(());
    }

    let mut inline = [0u32; FATFS_LINK_TBL_SIZE];
    inline[0] = FATFS_LINK_TBL_SIZE as u32;

    match engine.lseek(io, file, Some(&mut inline[..]), SeekTarget::CreateLinkMap) {
        Ok(()) => {
            *slot = Some(LinkMap::Inline(inline));
            return Ok(());
        }
        Err(FResult::NotEnoughCore) => {}
        Err(rc) => {
            error!("FATFS: Creating linkmap error: {}", rc.name());
            return Err(rc);
        }
    }

    let need = inline[0] as usize;
    debug!("FATFS: Creating linkmap {} < {}, retry...", FATFS_LINK_TBL_SIZE, need);
    if need <= FATFS_LINK_TBL_SIZE {
        error!("FATFS: Engine asked for {} linkmap cells", need);
        return Err(FResult::IntErr);
    }

    let mut cells = Vec::new();
    if cells.try_reserve_exact(need).is_err() {
        error!("FATFS: Can't allocate {} linkmap cells", need);
        return Err(FResult::NotEnoughCore);
    }
    cells.resize(need, 0);
    cells[0] = need as u32;

    match engine.lseek(io, file, Some(cells.as_mut_slice()), SeekTarget::CreateLinkMap) {
        Ok(()) => {
            *slot = Some(LinkMap::Heap(cells));
            Ok(())
        }
        Err(rc) => {
            error!("FATFS: Creating linkmap error: {}", rc.name());
            Err(rc)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_used_cells() {
        let mut cells = [0u32; FATFS_LINK_TBL_SIZE];
        cells[0] = 6;
        let map = LinkMap::Inline(cells);
        assert_eq!(map.used(), 6);
        assert!(!map.is_heap());
        assert_eq!(map.len(), FATFS_LINK_TBL_SIZE);
    }

    #[test]
    fn test_used_clamped_to_capacity() {
        let map = LinkMap::Heap(vec![100, 1, 2]);
        assert_eq!(map.used(), 3);
        assert!(map.is_heap());
    }
}
