use embassy_time::Instant;

use crate::block::{BlockError, SECTOR_SIZE};

use super::time::FatTimestamp;

pub(super) const DIR_ENTRY_SIZE: usize = 32;
pub(super) const DIR_ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / DIR_ENTRY_SIZE;
pub(super) const FAT_ENTRIES_PER_SECTOR: u32 = (SECTOR_SIZE / 4) as u32;
pub(super) const FAT32_EOC: u32 = 0x0FFF_FFF8;
pub(super) const FAT32_EOC_WRITE: u32 = 0x0FFF_FFFF;
pub(super) const MAX_PATH_SEGMENTS: usize = 16;
pub const FAT_NAME_MAX: usize = 255;
pub(super) const MAX_LFN_SLOTS: usize = 20;
pub(super) const ATTR_READ_ONLY: u8 = 0x01;
pub(super) const ATTR_LONG_NAME: u8 = 0x0F;
pub(super) const ATTR_VOLUME: u8 = 0x08;
pub(super) const ATTR_DIRECTORY: u8 = 0x10;
pub(super) const ATTR_ARCHIVE: u8 = 0x20;
pub(super) const DOT_NAME: [u8; 11] = *b".          ";
pub(super) const DOTDOT_NAME: [u8; 11] = *b"..         ";

#[derive(Clone, Copy)]
pub(super) struct PathSegment {
    pub(super) name: [u8; FAT_NAME_MAX],
    pub(super) len: u8,
}

impl PathSegment {
    pub(super) const EMPTY: Self = Self {
        name: [0; FAT_NAME_MAX],
        len: 0,
    };

    pub(super) fn as_bytes(&self) -> &[u8] {
        &self.name[..self.len as usize]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdFatError {
    Device(BlockError),
    UnsupportedFatType,
    InvalidBootSector,
    UnsupportedSectorSize(u16),
    UnsupportedSectorsPerCluster(u8),
    VolumeTooSmall,
    InvalidPath,
    PathTooDeep,
    InvalidShortName,
    InvalidLongName,
    NameTooLong,
    NotFound,
    NotDirectory,
    IsDirectory,
    NotEmpty,
    AlreadyExists,
    ReadOnly,
    DirFull,
    FileTooLarge,
    NoFreeCluster,
    BadCluster(u32),
    ClusterChainTooLong,
    /// The volume's deadline passed before the call reached its commit.
    DeadlineExceeded,
}

impl SdFatError {
    /// The card stopped answering while the engine was talking to it.
    pub fn is_card_absent(self) -> bool {
        matches!(self, Self::Device(err) if err.is_card_absent())
    }

    /// Errors that mean the on-card structures are not a usable FAT32 volume.
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            Self::UnsupportedFatType
                | Self::InvalidBootSector
                | Self::UnsupportedSectorSize(_)
                | Self::UnsupportedSectorsPerCluster(_)
                | Self::BadCluster(_)
                | Self::ClusterChainTooLong
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Device(err) => err.label(),
            Self::UnsupportedFatType => "unsupported_fat_type",
            Self::InvalidBootSector => "invalid_boot_sector",
            Self::UnsupportedSectorSize(_) => "unsupported_sector_size",
            Self::UnsupportedSectorsPerCluster(_) => "unsupported_cluster_size",
            Self::VolumeTooSmall => "volume_too_small",
            Self::InvalidPath => "invalid_path",
            Self::PathTooDeep => "path_too_deep",
            Self::InvalidShortName => "invalid_short_name",
            Self::InvalidLongName => "invalid_long_name",
            Self::NameTooLong => "name_too_long",
            Self::NotFound => "not_found",
            Self::NotDirectory => "not_directory",
            Self::IsDirectory => "is_directory",
            Self::NotEmpty => "not_empty",
            Self::AlreadyExists => "already_exists",
            Self::ReadOnly => "read_only",
            Self::DirFull => "dir_full",
            Self::FileTooLarge => "file_too_large",
            Self::NoFreeCluster => "no_free_cluster",
            Self::BadCluster(_) => "bad_cluster",
            Self::ClusterChainTooLong => "cluster_chain_too_long",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl From<BlockError> for SdFatError {
    fn from(value: BlockError) -> Self {
        Self::Device(value)
    }
}

#[derive(Clone, Copy)]
pub struct FatDirEntry {
    pub name: [u8; FAT_NAME_MAX],
    pub name_len: u8,
    pub attr: u8,
    pub size: u32,
    pub modified: FatTimestamp,
}

impl FatDirEntry {
    pub const EMPTY: Self = Self {
        name: [0; FAT_NAME_MAX],
        name_len: 0,
        attr: 0,
        size: 0,
        modified: FatTimestamp::EPOCH,
    };

    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("")
    }

    pub fn is_dir(&self) -> bool {
        (self.attr & ATTR_DIRECTORY) != 0
    }

    pub fn is_read_only(&self) -> bool {
        (self.attr & ATTR_READ_ONLY) != 0
    }
}

/// Geometry of a mounted FAT32 volume plus the allocator's running state.
#[derive(Clone, Copy, Debug)]
pub struct FatVolume {
    pub(super) fat_start_lba: u32,
    pub(super) fat_size_sectors: u32,
    pub(super) fats: u8,
    pub(super) data_start_lba: u32,
    pub(super) sectors_per_cluster: u8,
    pub(super) root_cluster: u32,
    pub(super) total_clusters: u32,
    pub(super) fs_info_lba: Option<u32>,
    pub(super) next_free: u32,
    pub(super) free_clusters: Option<u32>,
    pub(super) now: FatTimestamp,
    pub(super) deadline: Option<Instant>,
}

impl FatVolume {
    pub fn cluster_size(&self) -> u32 {
        SECTOR_SIZE as u32 * self.sectors_per_cluster as u32
    }

    pub fn total_clusters(&self) -> u32 {
        self.total_clusters
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_clusters as u64 * self.cluster_size() as u64
    }

    /// Stamp applied to entries created or modified from now on.
    pub fn set_time(&mut self, now: FatTimestamp) {
        self.now = now;
    }

    pub fn time(&self) -> FatTimestamp {
        self.now
    }

    /// Calls that move data give up with [`SdFatError::DeadlineExceeded`]
    /// once `deadline` has passed. They only stop between steps that leave
    /// the volume consistent, so an abandoned call at worst leaks clusters.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn check_deadline(&self) -> Result<(), SdFatError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(SdFatError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    pub(super) fn max_cluster(&self) -> u32 {
        self.total_clusters.saturating_add(1)
    }

    pub(super) fn chain_limit(&self) -> u32 {
        self.total_clusters.saturating_add(2)
    }

    pub(super) fn note_allocated(&mut self, cluster: u32) {
        self.next_free = cluster.saturating_add(1);
        if let Some(free) = self.free_clusters.as_mut() {
            *free = free.saturating_sub(1);
        }
    }

    pub(super) fn note_released(&mut self, cluster: u32) {
        if cluster >= 2 && cluster < self.next_free {
            self.next_free = cluster;
        }
        if let Some(free) = self.free_clusters.as_mut() {
            *free = free.saturating_add(1);
        }
    }
}

#[derive(Clone, Copy)]
pub(super) struct DirRecord {
    pub(super) short_name: [u8; 11],
    pub(super) display_name: [u8; FAT_NAME_MAX],
    pub(super) display_name_len: u8,
    pub(super) attr: u8,
    pub(super) case_flags: u8,
    pub(super) first_cluster: u32,
    pub(super) size: u32,
    pub(super) modified: FatTimestamp,
}

impl DirRecord {
    /// Entry contents without a name; the name is filled in when the entry
    /// is placed in a directory.
    pub(super) fn unnamed(attr: u8, first_cluster: u32, size: u32, modified: FatTimestamp) -> Self {
        Self {
            short_name: [b' '; 11],
            display_name: [0; FAT_NAME_MAX],
            display_name_len: 0,
            attr,
            case_flags: 0,
            first_cluster,
            size,
            modified,
        }
    }

    pub(super) fn is_dir(&self) -> bool {
        (self.attr & ATTR_DIRECTORY) != 0
    }

    pub(super) fn is_read_only(&self) -> bool {
        (self.attr & ATTR_READ_ONLY) != 0
    }

    pub(super) fn to_entry(self) -> FatDirEntry {
        FatDirEntry {
            name: self.display_name,
            name_len: self.display_name_len,
            attr: self.attr,
            size: self.size,
            modified: self.modified,
        }
    }
}

#[derive(Clone, Copy)]
pub(super) struct DirLocation {
    pub(super) lba: u32,
    pub(super) slot: u8,
}

impl DirLocation {
    pub(super) const ZERO: Self = Self { lba: 0, slot: 0 };
}

#[derive(Clone, Copy)]
pub(super) struct DirFound {
    pub(super) short_location: DirLocation,
    pub(super) lfn_locations: [DirLocation; MAX_LFN_SLOTS],
    pub(super) lfn_count: u8,
    pub(super) record: DirRecord,
}
