use crate::block::{BlockDevice, Sector, SECTOR_SIZE};

use super::time::FatTimestamp;
use super::types::{FatVolume, SdFatError};

const FS_INFO_LEAD_SIG: u32 = 0x4161_5252;
const FS_INFO_STRUCT_SIG: u32 = 0x6141_7272;

/// Finds and validates a FAT32 volume, either behind an MBR partition entry
/// or written directly from sector 0.
pub async fn mount<D: BlockDevice>(sd: &mut D) -> Result<FatVolume, SdFatError> {
    let mut sector0 = [0u8; SECTOR_SIZE];
    sd.read_sector(0, &mut sector0).await?;

    if let Some(start) = first_fat_partition_lba(&sector0) {
        match parse_fat32_boot(start, sd).await {
            Ok(volume) => return Ok(volume),
            Err(err @ SdFatError::Device(_)) => return Err(err),
            Err(_) => {}
        }
    }

    parse_fat32_boot(0, sd).await
}

/// Writes the allocator hints back to FSInfo and flushes the device.
pub async fn sync<D: BlockDevice>(sd: &mut D, volume: &FatVolume) -> Result<(), SdFatError> {
    if let (Some(lba), Some(free)) = (volume.fs_info_lba, volume.free_clusters) {
        let mut sector = [0u8; SECTOR_SIZE];
        sd.read_sector(lba, &mut sector).await?;
        if fs_info_valid(&sector) {
            sector[488..492].copy_from_slice(&free.to_le_bytes());
            sector[492..496].copy_from_slice(&volume.next_free.to_le_bytes());
            sd.write_sector(lba, &sector).await?;
        }
    }
    sd.flush().await?;
    Ok(())
}

async fn parse_fat32_boot<D: BlockDevice>(
    partition_start_lba: u32,
    sd: &mut D,
) -> Result<FatVolume, SdFatError> {
    let mut boot = [0u8; SECTOR_SIZE];
    sd.read_sector(partition_start_lba, &mut boot).await?;

    if boot[510] != 0x55 || boot[511] != 0xAA {
        return Err(SdFatError::InvalidBootSector);
    }

    let bytes_per_sector = u16::from_le_bytes([boot[11], boot[12]]);
    if bytes_per_sector != SECTOR_SIZE as u16 {
        return Err(SdFatError::UnsupportedSectorSize(bytes_per_sector));
    }

    let sectors_per_cluster = boot[13];
    if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
        return Err(SdFatError::UnsupportedSectorsPerCluster(sectors_per_cluster));
    }

    let reserved_sectors = u16::from_le_bytes([boot[14], boot[15]]) as u32;
    let fats = boot[16];
    if fats == 0 || reserved_sectors == 0 {
        return Err(SdFatError::InvalidBootSector);
    }

    // FAT12/16 keep a 16-bit FAT size and a fixed root directory.
    let fat_size_16 = u16::from_le_bytes([boot[22], boot[23]]) as u32;
    let root_entries = u16::from_le_bytes([boot[17], boot[18]]);
    let fat_size = u32::from_le_bytes([boot[36], boot[37], boot[38], boot[39]]);
    if fat_size_16 != 0 || root_entries != 0 || fat_size == 0 {
        return Err(SdFatError::UnsupportedFatType);
    }

    let total_16 = u16::from_le_bytes([boot[19], boot[20]]) as u32;
    let total_32 = u32::from_le_bytes([boot[32], boot[33], boot[34], boot[35]]);
    let total_sectors = if total_16 != 0 { total_16 } else { total_32 };
    if total_sectors == 0 {
        return Err(SdFatError::InvalidBootSector);
    }

    let root_cluster = u32::from_le_bytes([boot[44], boot[45], boot[46], boot[47]]);
    if root_cluster < 2 {
        return Err(SdFatError::InvalidBootSector);
    }

    let fat_start_lba = partition_start_lba.saturating_add(reserved_sectors);
    let data_start_lba = fat_start_lba.saturating_add(fat_size.saturating_mul(fats as u32));
    let used_sectors = reserved_sectors.saturating_add(fat_size.saturating_mul(fats as u32));
    if total_sectors <= used_sectors {
        return Err(SdFatError::InvalidBootSector);
    }
    let data_sectors = total_sectors - used_sectors;
    let total_clusters = data_sectors / sectors_per_cluster as u32;
    let fat_capacity = fat_size.saturating_mul(SECTOR_SIZE as u32 / 4);
    if total_clusters == 0 || root_cluster > total_clusters + 1 || fat_capacity < total_clusters + 2 {
        return Err(SdFatError::InvalidBootSector);
    }

    let fs_info_sector = u16::from_le_bytes([boot[48], boot[49]]) as u32;
    let mut fs_info_lba = None;
    let mut next_free = 2;
    if fs_info_sector != 0 && fs_info_sector < reserved_sectors {
        let lba = partition_start_lba + fs_info_sector;
        let mut info = [0u8; SECTOR_SIZE];
        sd.read_sector(lba, &mut info).await?;
        if fs_info_valid(&info) {
            fs_info_lba = Some(lba);
            let hint = u32::from_le_bytes([info[492], info[493], info[494], info[495]]);
            if (2..=total_clusters + 1).contains(&hint) {
                next_free = hint;
            }
        }
    }

    Ok(FatVolume {
        fat_start_lba,
        fat_size_sectors: fat_size,
        fats,
        data_start_lba,
        sectors_per_cluster,
        root_cluster,
        total_clusters,
        fs_info_lba,
        next_free,
        free_clusters: None,
        now: FatTimestamp::EPOCH,
        deadline: None,
    })
}

fn fs_info_valid(sector: &Sector) -> bool {
    let lead = u32::from_le_bytes([sector[0], sector[1], sector[2], sector[3]]);
    let structure = u32::from_le_bytes([sector[484], sector[485], sector[486], sector[487]]);
    lead == FS_INFO_LEAD_SIG && structure == FS_INFO_STRUCT_SIG
}

fn first_fat_partition_lba(sector0: &Sector) -> Option<u32> {
    if sector0[510] != 0x55 || sector0[511] != 0xAA {
        return None;
    }
    for i in 0..4 {
        let base = 446 + i * 16;
        let part_type = sector0[base + 4];
        if !matches!(part_type, 0x0B | 0x0C) {
            continue;
        }
        let start = u32::from_le_bytes([
            sector0[base + 8],
            sector0[base + 9],
            sector0[base + 10],
            sector0[base + 11],
        ]);
        if start != 0 {
            return Some(start);
        }
    }
    None
}
