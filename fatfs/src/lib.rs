//! FAT Volume Adapter
//!
//! Bridges a FatFs-style filesystem engine to a path-routed virtual file
//! system. Each mounted volume sits on a block device (PIO) with an optional
//! companion DMA device, and is published under a mount path such as `/sd`
//! or `/ide1` through a name registry.
//!
//! # Layers
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │   Host VFS (NameRegistry + VfsHandler)        │
//! └──────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────┐
//! │   fs::FatFs  (mount table, handle pool,       │
//! │              link maps, errno translation)    │
//! └──────────────────────────────────────────────┘
//!                       │  FatEngine / DiskIo
//!                       ▼
//! ┌──────────────────────────────────────────────┐
//! │   io::router  (PIO / DMA / scratch buffer)    │
//! └──────────────────────────────────────────────┘
//!          │                         │
//!          ▼                         ▼
//!   PIO BlockDevice           DMA BlockDevice
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod fs;
pub mod io;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::FsConfig;
pub use fs::errno::Errno;
pub use fs::vfs::{Fd, MountNames, NameRegistry, VfsHandler};
pub use fs::FatFs;
pub use io::block::{BlockDevice, BlockStatus};
