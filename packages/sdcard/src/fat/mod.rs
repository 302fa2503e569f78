//! FAT32 engine over any [`BlockDevice`](crate::block::BlockDevice).
//!
//! Path-based and stateless apart from [`FatVolume`], which carries the
//! geometry found at mount time and the allocator hints. Long file names
//! are read and written; names that fit 8.3 are stored without one.

mod api_mutate;
mod api_read_write;
mod cluster_utils;
mod dir_ops;
mod dir_scan;
mod fat_mount;
mod format;
mod names_lfn;
mod time;
mod types;


pub use api_mutate::{
    append_file, mkdir, remove, rename, set_modified, set_read_only, truncate_file,
};
pub use api_read_write::{list_dir, read_file, stat, write_file};
pub use cluster_utils::{free_bytes, free_clusters};
pub use fat_mount::{mount, sync};
pub use format::{format_volume, plan_layout, FormatLayout, FormatOptions};
pub use time::FatTimestamp;
pub use types::{FatDirEntry, FatVolume, SdFatError, FAT_NAME_MAX};
