use crate::block::{BlockDevice, Sector, SECTOR_SIZE};

use super::types::{SdFatError, ATTR_VOLUME, FAT_ENTRIES_PER_SECTOR};

const RESERVED_SECTORS: u32 = 32;
const FAT_COPIES: u32 = 2;
const FS_INFO_SECTOR: u32 = 1;
const BACKUP_BOOT_SECTOR: u32 = 6;
const ROOT_CLUSTER: u32 = 2;
const MIN_CLUSTERS: u32 = 16;
const MAX_CLUSTERS: u32 = 0x0FFF_FFF5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatOptions {
    /// Cluster size in bytes; a power of two between 512 and 65536.
    pub cluster_size: u32,
    pub volume_id: u32,
    pub label: [u8; 11],
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            cluster_size: 4096,
            volume_id: 0x5D5D_0001,
            label: *b"NO NAME    ",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatLayout {
    pub total_sectors: u32,
    pub sectors_per_cluster: u8,
    pub fat_size_sectors: u32,
    pub total_clusters: u32,
}

/// Sizes the FAT so it covers every data cluster that remains after it.
pub fn plan_layout(total_sectors: u32, cluster_size: u32) -> Result<FormatLayout, SdFatError> {
    if !cluster_size.is_power_of_two() || !(512..=65_536).contains(&cluster_size) {
        return Err(SdFatError::UnsupportedSectorsPerCluster(0));
    }
    let spc = cluster_size / SECTOR_SIZE as u32;
    if spc > u8::MAX as u32 {
        return Err(SdFatError::UnsupportedSectorsPerCluster(0));
    }

    let mut fat_size = 1u32;
    let total_clusters = loop {
        let meta = RESERVED_SECTORS + FAT_COPIES * fat_size;
        if meta >= total_sectors {
            return Err(SdFatError::VolumeTooSmall);
        }
        let clusters = ((total_sectors - meta) / spc).min(MAX_CLUSTERS);
        let needed = (clusters + 2).div_ceil(FAT_ENTRIES_PER_SECTOR);
        if needed <= fat_size {
            break clusters;
        }
        fat_size = needed;
    };
    if total_clusters < MIN_CLUSTERS {
        return Err(SdFatError::VolumeTooSmall);
    }

    Ok(FormatLayout {
        total_sectors,
        sectors_per_cluster: spc as u8,
        fat_size_sectors: fat_size,
        total_clusters,
    })
}

fn boot_sector(layout: &FormatLayout, options: &FormatOptions) -> Sector {
    let mut boot = [0u8; SECTOR_SIZE];
    boot[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
    boot[3..11].copy_from_slice(b"SDSTORE ");
    boot[11..13].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
    boot[13] = layout.sectors_per_cluster;
    boot[14..16].copy_from_slice(&(RESERVED_SECTORS as u16).to_le_bytes());
    boot[16] = FAT_COPIES as u8;
    boot[21] = 0xF8;
    boot[24..26].copy_from_slice(&63u16.to_le_bytes());
    boot[26..28].copy_from_slice(&255u16.to_le_bytes());
    boot[32..36].copy_from_slice(&layout.total_sectors.to_le_bytes());
    boot[36..40].copy_from_slice(&layout.fat_size_sectors.to_le_bytes());
    boot[44..48].copy_from_slice(&ROOT_CLUSTER.to_le_bytes());
    boot[48..50].copy_from_slice(&(FS_INFO_SECTOR as u16).to_le_bytes());
    boot[50..52].copy_from_slice(&(BACKUP_BOOT_SECTOR as u16).to_le_bytes());
    boot[64] = 0x80;
    boot[66] = 0x29;
    boot[67..71].copy_from_slice(&options.volume_id.to_le_bytes());
    boot[71..82].copy_from_slice(&options.label);
    boot[82..90].copy_from_slice(b"FAT32   ");
    boot[510] = 0x55;
    boot[511] = 0xAA;
    boot
}

fn fs_info_sector(layout: &FormatLayout) -> Sector {
    let mut info = [0u8; SECTOR_SIZE];
    info[0..4].copy_from_slice(&0x4161_5252u32.to_le_bytes());
    info[484..488].copy_from_slice(&0x6141_7272u32.to_le_bytes());
    // The root directory already holds one cluster.
    info[488..492].copy_from_slice(&(layout.total_clusters - 1).to_le_bytes());
    info[492..496].copy_from_slice(&(ROOT_CLUSTER + 1).to_le_bytes());
    info[508..512].copy_from_slice(&0xAA55_0000u32.to_le_bytes());
    info
}

/// Writes an empty FAT32 volume over the whole device, starting at sector 0
/// with no partition table.
pub async fn format_volume<D: BlockDevice>(
    sd: &mut D,
    options: &FormatOptions,
) -> Result<FormatLayout, SdFatError> {
    let layout = plan_layout(sd.sector_count(), options.cluster_size)?;
    let zero = [0u8; SECTOR_SIZE];

    let fat_end = RESERVED_SECTORS + FAT_COPIES * layout.fat_size_sectors;
    for lba in 0..fat_end {
        sd.write_sector(lba, &zero).await?;
    }
    let root_lba = fat_end;
    for offset in 0..layout.sectors_per_cluster as u32 {
        sd.write_sector(root_lba + offset, &zero).await?;
    }

    let boot = boot_sector(&layout, options);
    let info = fs_info_sector(&layout);
    for base in [0, BACKUP_BOOT_SECTOR] {
        sd.write_sector(base, &boot).await?;
        sd.write_sector(base + FS_INFO_SECTOR, &info).await?;
    }

    let mut fat = [0u8; SECTOR_SIZE];
    fat[0..4].copy_from_slice(&0x0FFF_FFF8u32.to_le_bytes());
    fat[4..8].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
    fat[8..12].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
    for copy in 0..FAT_COPIES {
        sd.write_sector(RESERVED_SECTORS + copy * layout.fat_size_sectors, &fat)
            .await?;
    }

    if options.label != *b"NO NAME    " {
        let mut root = [0u8; SECTOR_SIZE];
        root[..11].copy_from_slice(&options.label);
        root[11] = ATTR_VOLUME;
        sd.write_sector(root_lba, &root).await?;
    }

    sd.flush().await?;
    Ok(layout)
}
