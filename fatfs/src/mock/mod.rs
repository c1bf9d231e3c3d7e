//! Test Doubles
//!
//! A simulated engine and fault-injecting devices, for exercising the
//! adapter without real FAT media. Built for tests and with the `mock`
//! feature.

pub mod devices;
pub mod sim;

pub use devices::{FaultyDevice, Faults, RamBackend, RejectingRegistry};
pub use sim::{format, write_mbr, SimEngine, SimFormat, SimProbe};
