use core::cmp;

use crate::block::{BlockDevice, Sector, SECTOR_SIZE};

use super::types::{
    FatVolume, SdFatError, FAT32_EOC, FAT32_EOC_WRITE, FAT_ENTRIES_PER_SECTOR,
};

pub(super) fn clusters_for_size(size: usize, cluster_size: usize) -> usize {
    if size == 0 {
        0
    } else {
        size.div_ceil(cluster_size)
    }
}

fn fat_entry_at(sector: &Sector, cluster: u32) -> u32 {
    let index = (cluster % FAT_ENTRIES_PER_SECTOR) as usize * 4;
    u32::from_le_bytes([
        sector[index],
        sector[index + 1],
        sector[index + 2],
        sector[index + 3],
    ]) & 0x0FFF_FFFF
}

/// Links `count` free clusters into a chain ending in EOC. On failure the
/// clusters taken so far are released again.
pub(super) async fn allocate_chain<D: BlockDevice>(
    sd: &mut D,
    volume: &mut FatVolume,
    count: u32,
) -> Result<u32, SdFatError> {
    let mut first = 0u32;
    let mut prev = 0u32;

    for _ in 0..count {
        let found = match volume.check_deadline() {
            Ok(()) => find_free_cluster(sd, volume, volume.next_free).await,
            Err(err) => Err(err),
        };
        let cluster = match found {
            Ok(cluster) => cluster,
            Err(err) => {
                if first != 0 {
                    free_chain(sd, volume, first).await?;
                }
                return Err(err);
            }
        };
        set_fat_entry(sd, volume, cluster, FAT32_EOC_WRITE).await?;
        if prev != 0 {
            set_fat_entry(sd, volume, prev, cluster).await?;
        } else {
            first = cluster;
        }
        volume.note_allocated(cluster);
        prev = cluster;
    }

    Ok(first)
}

async fn find_free_cluster<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    start_cluster: u32,
) -> Result<u32, SdFatError> {
    let max_cluster = volume.max_cluster();
    let start = if (2..=max_cluster).contains(&start_cluster) {
        start_cluster
    } else {
        2
    };

    let mut sector = [0u8; SECTOR_SIZE];
    let mut loaded = None;
    for cluster in (start..=max_cluster).chain(2..start) {
        let sector_offset = cluster / FAT_ENTRIES_PER_SECTOR;
        if loaded != Some(sector_offset) {
            sd.read_sector(volume.fat_start_lba + sector_offset, &mut sector)
                .await?;
            loaded = Some(sector_offset);
        }
        if fat_entry_at(&sector, cluster) == 0 {
            return Ok(cluster);
        }
    }

    Err(SdFatError::NoFreeCluster)
}

async fn count_free_clusters<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
) -> Result<u32, SdFatError> {
    let mut sector = [0u8; SECTOR_SIZE];
    let mut loaded = None;
    let mut free = 0u32;
    for cluster in 2..=volume.max_cluster() {
        let sector_offset = cluster / FAT_ENTRIES_PER_SECTOR;
        if loaded != Some(sector_offset) {
            sd.read_sector(volume.fat_start_lba + sector_offset, &mut sector)
                .await?;
            loaded = Some(sector_offset);
        }
        if fat_entry_at(&sector, cluster) == 0 {
            free += 1;
        }
    }
    Ok(free)
}

/// Free space in clusters. Counted from the FAT once per mount, then kept
/// up to date by the allocator.
pub async fn free_clusters<D: BlockDevice>(
    sd: &mut D,
    volume: &mut FatVolume,
) -> Result<u32, SdFatError> {
    if let Some(free) = volume.free_clusters {
        return Ok(free);
    }
    let free = count_free_clusters(sd, volume).await?;
    volume.free_clusters = Some(free);
    Ok(free)
}

pub async fn free_bytes<D: BlockDevice>(
    sd: &mut D,
    volume: &mut FatVolume,
) -> Result<u64, SdFatError> {
    let free = free_clusters(sd, volume).await?;
    Ok(free as u64 * volume.cluster_size() as u64)
}

pub(super) async fn free_chain<D: BlockDevice>(
    sd: &mut D,
    volume: &mut FatVolume,
    start_cluster: u32,
) -> Result<(), SdFatError> {
    if start_cluster < 2 {
        return Ok(());
    }

    let max_cluster = volume.max_cluster();
    let mut cluster = start_cluster;
    let mut visited = 0u32;

    loop {
        if visited > volume.chain_limit() {
            return Err(SdFatError::ClusterChainTooLong);
        }
        visited = visited.saturating_add(1);

        let entry = read_fat_entry(sd, volume, cluster).await?;
        set_fat_entry(sd, volume, cluster, 0).await?;
        volume.note_released(cluster);

        if entry >= FAT32_EOC || entry < 2 || entry > max_cluster {
            break;
        }
        cluster = entry;
    }

    Ok(())
}

/// Gives back a chain that never got linked into a directory entry. A
/// failure here only leaks the clusters, so it is logged and dropped.
pub(super) async fn release_unlinked<D: BlockDevice>(
    sd: &mut D,
    volume: &mut FatVolume,
    first_cluster: u32,
) {
    if let Err(err) = free_chain(sd, volume, first_cluster).await {
        log::warn!(
            "sdcard: fat_release_failed cluster={} err={}",
            first_cluster,
            err.label()
        );
    }
}

/// Allocates a chain for `data` and fills it without linking it anywhere.
/// Empty data needs no chain and yields cluster 0.
pub(super) async fn write_unlinked_chain<D: BlockDevice>(
    sd: &mut D,
    volume: &mut FatVolume,
    data: &[u8],
) -> Result<u32, SdFatError> {
    let clusters = clusters_for_size(data.len(), volume.cluster_size() as usize);
    if clusters == 0 {
        return Ok(0);
    }
    let first = allocate_chain(sd, volume, clusters as u32).await?;
    if let Err(err) = write_data_at(sd, volume, first, 0, data).await {
        release_unlinked(sd, volume, first).await;
        return Err(err);
    }
    Ok(first)
}

pub(super) async fn next_cluster<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    cluster: u32,
) -> Result<Option<u32>, SdFatError> {
    let value = read_fat_entry(sd, volume, cluster).await?;
    if value >= FAT32_EOC {
        return Ok(None);
    }
    if value < 2 || value > volume.max_cluster() {
        return Err(SdFatError::BadCluster(value));
    }
    Ok(Some(value))
}

fn fat_sector_offset(volume: &FatVolume, cluster: u32) -> Result<u32, SdFatError> {
    let sector_offset = cluster / FAT_ENTRIES_PER_SECTOR;
    if cluster > volume.max_cluster() || sector_offset >= volume.fat_size_sectors {
        return Err(SdFatError::BadCluster(cluster));
    }
    Ok(sector_offset)
}

pub(super) async fn read_fat_entry<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    cluster: u32,
) -> Result<u32, SdFatError> {
    let sector_offset = fat_sector_offset(volume, cluster)?;
    let mut sector = [0u8; SECTOR_SIZE];
    sd.read_sector(volume.fat_start_lba + sector_offset, &mut sector)
        .await?;
    Ok(fat_entry_at(&sector, cluster))
}

pub(super) async fn set_fat_entry<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    cluster: u32,
    value: u32,
) -> Result<(), SdFatError> {
    let sector_offset = fat_sector_offset(volume, cluster)?;
    let index = (cluster % FAT_ENTRIES_PER_SECTOR) as usize * 4;

    // Every FAT copy gets the same entry; the top nibble is reserved.
    for fat_idx in 0..volume.fats as u32 {
        let fat_base = volume
            .fat_start_lba
            .saturating_add(fat_idx.saturating_mul(volume.fat_size_sectors));
        let lba = fat_base.saturating_add(sector_offset);
        let mut sector = [0u8; SECTOR_SIZE];
        sd.read_sector(lba, &mut sector).await?;
        let old = u32::from_le_bytes([
            sector[index],
            sector[index + 1],
            sector[index + 2],
            sector[index + 3],
        ]);
        let new = (old & 0xF000_0000) | (value & 0x0FFF_FFFF);
        sector[index..index + 4].copy_from_slice(&new.to_le_bytes());
        sd.write_sector(lba, &sector).await?;
    }
    Ok(())
}

pub(super) fn cluster_to_lba(volume: &FatVolume, cluster: u32) -> Result<u32, SdFatError> {
    if cluster < 2 || cluster > volume.max_cluster() {
        return Err(SdFatError::BadCluster(cluster));
    }
    let index = cluster - 2;
    Ok(volume
        .data_start_lba
        .saturating_add(index.saturating_mul(volume.sectors_per_cluster as u32)))
}

pub(super) async fn zero_cluster<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    cluster: u32,
) -> Result<(), SdFatError> {
    let first_lba = cluster_to_lba(volume, cluster)?;
    let zero = [0u8; SECTOR_SIZE];
    for offset in 0..volume.sectors_per_cluster as u32 {
        sd.write_sector(first_lba + offset, &zero).await?;
    }
    Ok(())
}

pub(super) async fn cluster_at_index<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    first_cluster: u32,
    index: usize,
) -> Result<u32, SdFatError> {
    if first_cluster < 2 {
        return Err(SdFatError::BadCluster(first_cluster));
    }
    let mut cluster = first_cluster;
    for _ in 0..index {
        cluster = next_cluster(sd, volume, cluster)
            .await?
            .ok_or(SdFatError::ClusterChainTooLong)?;
    }
    Ok(cluster)
}

/// Reads `size` bytes of a cluster chain into a fresh buffer.
pub(super) async fn read_chain<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    first_cluster: u32,
    size: usize,
) -> Result<alloc::vec::Vec<u8>, SdFatError> {
    let mut out = alloc::vec![0u8; size];
    if size == 0 {
        return Ok(out);
    }

    let mut written = 0usize;
    let mut cluster = first_cluster;
    let mut visited = 0u32;

    while written < size {
        if visited > volume.chain_limit() {
            return Err(SdFatError::ClusterChainTooLong);
        }
        visited = visited.saturating_add(1);
        volume.check_deadline()?;

        for sector_offset in 0..volume.sectors_per_cluster as u32 {
            if written == size {
                break;
            }
            let lba = cluster_to_lba(volume, cluster)? + sector_offset;
            let mut sector = [0u8; SECTOR_SIZE];
            sd.read_sector(lba, &mut sector).await?;

            let chunk = cmp::min(size - written, SECTOR_SIZE);
            out[written..written + chunk].copy_from_slice(&sector[..chunk]);
            written += chunk;
        }

        if written == size {
            break;
        }
        cluster = next_cluster(sd, volume, cluster)
            .await?
            .ok_or(SdFatError::ClusterChainTooLong)?;
    }

    Ok(out)
}

pub(super) async fn write_data_at<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    first_cluster: u32,
    start_offset: usize,
    data: &[u8],
) -> Result<(), SdFatError> {
    if data.is_empty() {
        return Ok(());
    }

    let cluster_size = volume.cluster_size() as usize;
    let cluster_idx = start_offset / cluster_size;
    let mut cluster = cluster_at_index(sd, volume, first_cluster, cluster_idx).await?;
    let mut cluster_offset = start_offset % cluster_size;
    let mut data_idx = 0usize;

    while data_idx < data.len() {
        volume.check_deadline()?;
        let sector_start = cluster_offset / SECTOR_SIZE;
        let mut byte_in_sector = cluster_offset % SECTOR_SIZE;

        for sector_off in sector_start..volume.sectors_per_cluster as usize {
            if data_idx >= data.len() {
                break;
            }
            let lba = cluster_to_lba(volume, cluster)? + sector_off as u32;
            let remaining = data.len() - data_idx;
            let write_len = cmp::min(remaining, SECTOR_SIZE - byte_in_sector);
            let mut sector = [0u8; SECTOR_SIZE];

            if byte_in_sector != 0 || write_len < SECTOR_SIZE {
                sd.read_sector(lba, &mut sector).await?;
            }
            sector[byte_in_sector..byte_in_sector + write_len]
                .copy_from_slice(&data[data_idx..data_idx + write_len]);
            sd.write_sector(lba, &sector).await?;
            data_idx += write_len;
            byte_in_sector = 0;
        }

        cluster_offset = 0;
        if data_idx < data.len() {
            cluster = next_cluster(sd, volume, cluster)
                .await?
                .ok_or(SdFatError::ClusterChainTooLong)?;
        }
    }

    Ok(())
}

pub(super) async fn write_zeroes_at<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    first_cluster: u32,
    start_offset: usize,
    len: usize,
) -> Result<(), SdFatError> {
    let mut remaining = len;
    let zero = [0u8; SECTOR_SIZE];
    let cluster_size = volume.cluster_size() as usize;
    let cluster_idx = start_offset / cluster_size;
    let mut cluster = cluster_at_index(sd, volume, first_cluster, cluster_idx).await?;
    let mut cluster_offset = start_offset % cluster_size;

    while remaining > 0 {
        let sector_start = cluster_offset / SECTOR_SIZE;
        let mut byte_in_sector = cluster_offset % SECTOR_SIZE;
        for sector_off in sector_start..volume.sectors_per_cluster as usize {
            if remaining == 0 {
                break;
            }
            let lba = cluster_to_lba(volume, cluster)? + sector_off as u32;
            let chunk = cmp::min(remaining, SECTOR_SIZE - byte_in_sector);
            if byte_in_sector == 0 && chunk == SECTOR_SIZE {
                sd.write_sector(lba, &zero).await?;
            } else {
                let mut sector = [0u8; SECTOR_SIZE];
                sd.read_sector(lba, &mut sector).await?;
                sector[byte_in_sector..byte_in_sector + chunk].fill(0);
                sd.write_sector(lba, &sector).await?;
            }
            remaining -= chunk;
            byte_in_sector = 0;
        }
        cluster_offset = 0;
        if remaining > 0 {
            cluster = next_cluster(sd, volume, cluster)
                .await?
                .ok_or(SdFatError::ClusterChainTooLong)?;
        }
    }
    Ok(())
}

pub(super) async fn zero_tail_after_size<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    first_cluster: u32,
    size: usize,
) -> Result<(), SdFatError> {
    let sector_offset = size % SECTOR_SIZE;
    if sector_offset == 0 {
        return Ok(());
    }
    let cluster_size = volume.cluster_size() as usize;
    let cluster = cluster_at_index(sd, volume, first_cluster, size / cluster_size).await?;
    let sector_idx = (size % cluster_size) / SECTOR_SIZE;
    let lba = cluster_to_lba(volume, cluster)? + sector_idx as u32;
    let mut sector = [0u8; SECTOR_SIZE];
    sd.read_sector(lba, &mut sector).await?;
    sector[sector_offset..].fill(0);
    sd.write_sector(lba, &sector).await?;
    Ok(())
}
