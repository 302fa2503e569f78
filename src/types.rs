use alloc::{string::String, vec::Vec};

use sdcard::{block::CARD_NAME_MAX, fat::FatDirEntry};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Uninitialized,
    Initialized,
    Mounted,
    Unmounted,
    Error,
}

impl DeviceState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Mounted => "mounted",
            Self::Unmounted => "unmounted",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub card_present: bool,
    pub mounted: bool,
    pub capacity_bytes: u64,
    pub sector_size: u32,
    pub card_name: heapless::String<CARD_NAME_MAX>,
    pub serial_number: u32,
    pub mount_point: String,
    pub max_files: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CapacitySnapshot {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

impl CapacitySnapshot {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.free_bytes)
    }

    /// Free space strictly under `percent` of the total.
    pub fn is_below(&self, percent: u64) -> bool {
        self.total_bytes > 0 && self.free_bytes.saturating_mul(100) < self.total_bytes * percent
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OperationCounters {
    pub total: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub timed_out: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub file_count: u32,
    pub dir_count: u32,
}

pub const PERM_READ: u16 = 0o444;
pub const PERM_WRITE: u16 = 0o222;
pub const PERM_EXEC: u16 = 0o111;
pub const PERM_DEFAULT: u16 = 0o777;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    /// Unix seconds, two-second resolution.
    pub modified: u64,
    pub is_directory: bool,
    pub permissions: u16,
}

impl FileInfo {
    /// FAT only knows a read-only bit; it clears every write permission.
    pub fn from_entry(name: String, entry: &FatDirEntry) -> Self {
        let permissions = if entry.is_read_only() {
            PERM_DEFAULT & !PERM_WRITE
        } else {
            PERM_DEFAULT
        };
        Self {
            name,
            size: entry.size as u64,
            modified: entry.modified.to_unix() as u64,
            is_directory: entry.is_dir(),
            permissions,
        }
    }

    pub fn is_writable(&self) -> bool {
        (self.permissions & PERM_WRITE) != 0
    }
}

/// Entries of one directory, or the hits of a search.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    entries: Vec<FileInfo>,
}

impl DirectoryListing {
    const INITIAL_CAPACITY: usize = 8;

    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, info: FileInfo) {
        if self.entries.len() == self.entries.capacity() {
            let grow = self.entries.capacity().max(Self::INITIAL_CAPACITY);
            self.entries.reserve_exact(grow);
        }
        self.entries.push(info);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FileInfo] {
        &self.entries
    }

    pub fn iter(&self) -> core::slice::Iter<'_, FileInfo> {
        self.entries.iter()
    }

    pub fn find(&self, name: &str) -> Option<&FileInfo> {
        self.entries.iter().find(|info| info.name == name)
    }

    pub fn into_entries(self) -> Vec<FileInfo> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a DirectoryListing {
    type Item = &'a FileInfo;
    type IntoIter = core::slice::Iter<'a, FileInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirectorySize {
    pub total_bytes: u64,
    pub file_count: u32,
    pub dir_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str) -> FileInfo {
        FileInfo {
            name: String::from(name),
            size: 0,
            modified: 0,
            is_directory: false,
            permissions: PERM_DEFAULT,
        }
    }

    #[test]
    fn listing_capacity_doubles() {
        let mut listing = DirectoryListing::new();
        listing.push(info("a"));
        assert!(listing.entries.capacity() >= 8);
        for idx in 0..8 {
            listing.push(info(if idx % 2 == 0 { "b" } else { "c" }));
        }
        assert_eq!(listing.len(), 9);
        assert!(listing.entries.capacity() >= 16);
        assert!(listing.find("a").is_some());
        assert!(listing.find("z").is_none());
    }

    #[test]
    fn low_space_threshold_is_strict() {
        let snapshot = CapacitySnapshot {
            total_bytes: 1000,
            free_bytes: 100,
        };
        assert!(!snapshot.is_below(10));
        let snapshot = CapacitySnapshot {
            free_bytes: 99,
            ..snapshot
        };
        assert!(snapshot.is_below(10));
        assert_eq!(snapshot.used_bytes(), 901);
        assert!(!CapacitySnapshot::default().is_below(10));
    }
}
