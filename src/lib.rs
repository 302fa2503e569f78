#![cfg_attr(not(test), no_std)]

//! Asynchronous removable-storage manager.
//!
//! A [`StorageManager`] owns the lifecycle of one card slot. Callers submit
//! filesystem operations to a bounded FIFO queue; a single worker future
//! ([`StorageManager::run_worker`]) owns the card and the mounted FAT volume
//! and runs them one at a time, reporting each outcome through the request's
//! completion and an optional [`EventSink`]. A health monitor
//! ([`StorageManager::run_health_monitor`]) watches for card removal and low
//! free space.

extern crate alloc;

pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod fs;
pub mod manager;
pub mod monitor;
pub mod queue;
pub mod state;
pub mod types;
pub mod worker;

pub use config::StorageConfig;
pub use device::DeviceManager;
pub use error::{FsError, StorageError};
pub use events::{EventSink, NoEventBus, StorageEvent};
pub use fs::{CopyOptions, Filesystem, MkdirOptions, RmdirOptions, SearchOptions, WriteOptions};
pub use manager::StorageManager;
pub use queue::{Completion, Operation, OperationKind, OperationOutput, OperationResult, Payload};
pub use types::{
    CapacitySnapshot, DeviceInfo, DeviceState, DirectoryListing, DirectorySize, FileInfo,
    OperationCounters, StorageStats,
};
