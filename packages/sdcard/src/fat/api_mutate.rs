use crate::block::BlockDevice;

use super::cluster_utils::{
    allocate_chain, cluster_at_index, clusters_for_size, free_chain, next_cluster,
    release_unlinked, set_fat_entry, write_data_at, write_unlinked_chain, write_zeroes_at,
    zero_tail_after_size,
};
use super::dir_ops::{
    create_entry, initialize_directory_cluster, is_directory_empty, mark_found_deleted,
    set_parent_link, write_directory_entry,
};
use super::dir_scan::{locate, locate_existing};
use super::names_lfn::parse_path;
use super::time::FatTimestamp;
use super::types::{
    DirFound, DirRecord, FatVolume, PathSegment, SdFatError, ATTR_ARCHIVE, ATTR_DIRECTORY,
    ATTR_READ_ONLY, FAT32_EOC_WRITE, MAX_PATH_SEGMENTS,
};

pub async fn mkdir<D: BlockDevice>(
    sd: &mut D,
    volume: &mut FatVolume,
    path: &str,
) -> Result<(), SdFatError> {
    let located = locate(sd, volume, path).await?;
    if located.found.is_some() {
        return Err(SdFatError::AlreadyExists);
    }

    let dir_cluster = allocate_chain(sd, volume, 1).await?;
    initialize_directory_cluster(sd, volume, dir_cluster, located.parent_cluster).await?;
    let body = DirRecord::unnamed(ATTR_DIRECTORY, dir_cluster, 0, volume.now);
    create_entry(sd, volume, located.parent_cluster, &located.name, body).await
}

/// Deletes a file or an empty directory.
pub async fn remove<D: BlockDevice>(
    sd: &mut D,
    volume: &mut FatVolume,
    path: &str,
) -> Result<(), SdFatError> {
    let (_, found) = locate_existing(sd, volume, path).await?;

    if found.record.is_dir() {
        if !is_directory_empty(sd, volume, found.record.first_cluster).await? {
            return Err(SdFatError::NotEmpty);
        }
    } else if found.record.is_read_only() {
        return Err(SdFatError::ReadOnly);
    }
    mark_found_deleted(sd, &found).await?;
    if found.record.first_cluster >= 2 {
        free_chain(sd, volume, found.record.first_cluster).await?;
    }
    Ok(())
}

fn is_within(dst: &str, src: &str) -> Result<bool, SdFatError> {
    let mut src_segments = [PathSegment::EMPTY; MAX_PATH_SEGMENTS];
    let src_count = parse_path(src, &mut src_segments)?;
    let mut dst_segments = [PathSegment::EMPTY; MAX_PATH_SEGMENTS];
    let dst_count = parse_path(dst, &mut dst_segments)?;
    Ok(dst_count > src_count
        && src_segments[..src_count]
            .iter()
            .zip(dst_segments.iter())
            .all(|(a, b)| a.as_bytes().eq_ignore_ascii_case(b.as_bytes())))
}

/// Moves an entry to a new name, possibly in another directory. The
/// destination must not exist.
pub async fn rename<D: BlockDevice>(
    sd: &mut D,
    volume: &mut FatVolume,
    src: &str,
    dst: &str,
) -> Result<(), SdFatError> {
    let (src_parent, src_found) = locate_existing(sd, volume, src).await?;
    if src_found.record.is_dir() && is_within(dst, src)? {
        return Err(SdFatError::InvalidPath);
    }
    let dst_located = locate(sd, volume, dst).await?;
    if dst_located.found.is_some() {
        return Err(SdFatError::AlreadyExists);
    }

    let record = src_found.record;
    let body = DirRecord::unnamed(record.attr, record.first_cluster, record.size, record.modified);
    create_entry(sd, volume, dst_located.parent_cluster, &dst_located.name, body).await?;
    mark_found_deleted(sd, &src_found).await?;

    if record.is_dir() && record.first_cluster >= 2 && src_parent != dst_located.parent_cluster {
        set_parent_link(sd, volume, record.first_cluster, dst_located.parent_cluster).await?;
    }
    Ok(())
}

async fn existing_file<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    path: &str,
) -> Result<DirFound, SdFatError> {
    let (_, found) = locate_existing(sd, volume, path).await?;
    if found.record.is_dir() {
        return Err(SdFatError::IsDirectory);
    }
    if found.record.is_read_only() {
        return Err(SdFatError::ReadOnly);
    }
    Ok(found)
}

/// Grows or shrinks the chain behind `first_cluster` from `old_size` to
/// `new_size` bytes and returns the (possibly new) first cluster.
async fn resize_chain<D: BlockDevice>(
    sd: &mut D,
    volume: &mut FatVolume,
    first_cluster: u32,
    old_size: usize,
    new_size: usize,
) -> Result<u32, SdFatError> {
    let cluster_size = volume.cluster_size() as usize;
    let old_clusters = clusters_for_size(old_size, cluster_size);
    let target_clusters = clusters_for_size(new_size, cluster_size);

    if target_clusters == 0 {
        if first_cluster >= 2 {
            free_chain(sd, volume, first_cluster).await?;
        }
        return Ok(0);
    }
    if old_clusters == 0 || first_cluster < 2 {
        return allocate_chain(sd, volume, target_clusters as u32).await;
    }
    if target_clusters > old_clusters {
        let extra = allocate_chain(sd, volume, (target_clusters - old_clusters) as u32).await?;
        let tail = cluster_at_index(sd, volume, first_cluster, old_clusters - 1).await?;
        set_fat_entry(sd, volume, tail, extra).await?;
    } else if target_clusters < old_clusters {
        let keep_tail = cluster_at_index(sd, volume, first_cluster, target_clusters - 1).await?;
        let free_start = next_cluster(sd, volume, keep_tail).await?;
        set_fat_entry(sd, volume, keep_tail, FAT32_EOC_WRITE).await?;
        if let Some(start) = free_start {
            free_chain(sd, volume, start).await?;
        }
    }
    Ok(first_cluster)
}

/// Adds `data` after the current end of the file.
///
/// The part that fits in the last cluster's slack lands past the recorded
/// size, the rest in an unlinked chain. Only once both are written does the
/// chain get linked and the entry take the new size.
pub async fn append_file<D: BlockDevice>(
    sd: &mut D,
    volume: &mut FatVolume,
    path: &str,
    data: &[u8],
) -> Result<(), SdFatError> {
    let found = existing_file(sd, volume, path).await?;
    if data.is_empty() {
        return Ok(());
    }

    let old_size = found.record.size as usize;
    let new_size = old_size
        .checked_add(data.len())
        .filter(|size| *size <= u32::MAX as usize)
        .ok_or(SdFatError::FileTooLarge)?;
    let cluster_size = volume.cluster_size() as usize;
    let old_clusters = clusters_for_size(old_size, cluster_size);
    let first_cluster = found.record.first_cluster;

    let first_cluster = if old_clusters == 0 || first_cluster < 2 {
        write_unlinked_chain(sd, volume, data).await?
    } else {
        let tail = cluster_at_index(sd, volume, first_cluster, old_clusters - 1).await?;
        let slack = old_clusters * cluster_size - old_size;
        let (head, rest) = data.split_at(slack.min(data.len()));
        write_data_at(sd, volume, first_cluster, old_size, head).await?;
        if !rest.is_empty() {
            let extra = write_unlinked_chain(sd, volume, rest).await?;
            if let Err(err) = set_fat_entry(sd, volume, tail, extra).await {
                release_unlinked(sd, volume, extra).await;
                return Err(err);
            }
        }
        first_cluster
    };

    let record = DirRecord {
        attr: found.record.attr | ATTR_ARCHIVE,
        first_cluster,
        size: new_size as u32,
        modified: volume.now,
        ..found.record
    };
    write_directory_entry(sd, &found.short_location, &record).await
}

/// Sets the file length, zero-filling any growth.
pub async fn truncate_file<D: BlockDevice>(
    sd: &mut D,
    volume: &mut FatVolume,
    path: &str,
    new_size: usize,
) -> Result<(), SdFatError> {
    let found = existing_file(sd, volume, path).await?;
    let new_size_u32 = u32::try_from(new_size).map_err(|_| SdFatError::FileTooLarge)?;
    let old_size = found.record.size as usize;
    if new_size == old_size {
        return Ok(());
    }

    let first_cluster =
        resize_chain(sd, volume, found.record.first_cluster, old_size, new_size).await?;
    if new_size > old_size {
        write_zeroes_at(sd, volume, first_cluster, old_size, new_size - old_size).await?;
    } else if new_size > 0 {
        zero_tail_after_size(sd, volume, first_cluster, new_size).await?;
    }

    let record = DirRecord {
        first_cluster,
        size: new_size_u32,
        modified: volume.now,
        ..found.record
    };
    write_directory_entry(sd, &found.short_location, &record).await
}

pub async fn set_read_only<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    path: &str,
    read_only: bool,
) -> Result<(), SdFatError> {
    let (_, found) = locate_existing(sd, volume, path).await?;
    let attr = if read_only {
        found.record.attr | ATTR_READ_ONLY
    } else {
        found.record.attr & !ATTR_READ_ONLY
    };
    let record = DirRecord {
        attr,
        ..found.record
    };
    write_directory_entry(sd, &found.short_location, &record).await
}

pub async fn set_modified<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    path: &str,
    modified: FatTimestamp,
) -> Result<(), SdFatError> {
    let (_, found) = locate_existing(sd, volume, path).await?;
    let record = DirRecord {
        modified,
        ..found.record
    };
    write_directory_entry(sd, &found.short_location, &record).await
}
