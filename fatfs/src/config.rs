//! Build-Time Limits and Runtime Options
//!
//! The pools in this crate are fixed-size tables sized here. Runtime
//! behaviour that a board may want to tune lives in [`FsConfig`].

/// Maximum number of simultaneously mounted volumes
pub const MAX_FAT_MOUNTS: usize = 8;

/// Maximum number of simultaneously open files and directories
pub const MAX_FAT_FILES: usize = 16;

/// Cells in the inline cluster link map carried by every handle
pub const FATFS_LINK_TBL_SIZE: usize = 32;

/// Alignment required for buffers handed straight to a DMA device
pub const DMA_ALIGN: usize = 32;

/// Primary partition slots in a master boot record
pub const MAX_PARTITIONS: usize = 4;

/// Capacity reserved for a logical drive path ("0:" .. "7:")
pub const MAX_DRIVE_PATH: usize = 16;

/// Runtime options for the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsConfig {
    /// Allocate a cluster-sized aligned scratch buffer per DMA-capable mount
    pub use_dma_buf: bool,
    /// Route multi-sector writes through the DMA device as well
    pub dma_write: bool,
}

impl FsConfig {
    pub const fn new() -> Self {
        Self {
            use_dma_buf: true,
            dma_write: false,
        }
    }
}

impl Default for FsConfig {
    fn default() -> Self {
        Self::new()
    }
}
