//! File-backed page storage for QuarryDB.

pub mod disk;

pub use disk::{DiskManager, DiskManagerConfig};
