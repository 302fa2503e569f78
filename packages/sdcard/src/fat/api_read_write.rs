use alloc::vec::Vec;

use crate::block::BlockDevice;

use super::cluster_utils::{free_chain, read_chain, release_unlinked, write_unlinked_chain};
use super::dir_ops::{create_entry, write_directory_entry};
use super::dir_scan::{collect_entries, locate, locate_existing, resolve_path_dir};
use super::names_lfn::parse_path;
use super::types::{
    DirRecord, FatDirEntry, FatVolume, PathSegment, SdFatError, ATTR_ARCHIVE, ATTR_DIRECTORY,
    MAX_PATH_SEGMENTS,
};

pub async fn list_dir<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    path: &str,
) -> Result<Vec<FatDirEntry>, SdFatError> {
    let dir_cluster = resolve_path_dir(sd, volume, path).await?;
    collect_entries(sd, volume, dir_cluster).await
}

pub async fn read_file<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    path: &str,
) -> Result<Vec<u8>, SdFatError> {
    let (_, found) = locate_existing(sd, volume, path).await?;
    let record = found.record;
    if record.is_dir() {
        return Err(SdFatError::IsDirectory);
    }

    let file_size = record.size as usize;
    if file_size == 0 {
        return Ok(Vec::new());
    }
    if record.first_cluster < 2 {
        return Err(SdFatError::BadCluster(record.first_cluster));
    }
    read_chain(sd, volume, record.first_cluster, file_size).await
}

/// Creates `path` or replaces its contents. The parent directory must exist.
///
/// New contents go to a fresh chain; the old chain is freed only after the
/// directory entry points at the new one, so a failure part way leaves the
/// previous contents in place.
pub async fn write_file<D: BlockDevice>(
    sd: &mut D,
    volume: &mut FatVolume,
    path: &str,
    data: &[u8],
) -> Result<(), SdFatError> {
    let size = u32::try_from(data.len()).map_err(|_| SdFatError::FileTooLarge)?;
    let located = locate(sd, volume, path).await?;
    if let Some(found) = &located.found {
        if found.record.is_dir() {
            return Err(SdFatError::IsDirectory);
        }
        if found.record.is_read_only() {
            return Err(SdFatError::ReadOnly);
        }
    }

    let new_first_cluster = write_unlinked_chain(sd, volume, data).await?;
    let committed = match &located.found {
        Some(found) => {
            let record = DirRecord {
                attr: found.record.attr | ATTR_ARCHIVE,
                first_cluster: new_first_cluster,
                size,
                modified: volume.now,
                ..found.record
            };
            write_directory_entry(sd, &found.short_location, &record).await
        }
        None => {
            let body = DirRecord::unnamed(ATTR_ARCHIVE, new_first_cluster, size, volume.now);
            create_entry(sd, volume, located.parent_cluster, &located.name, body).await
        }
    };
    if let Err(err) = committed {
        if new_first_cluster >= 2 {
            release_unlinked(sd, volume, new_first_cluster).await;
        }
        return Err(err);
    }

    match located.found {
        Some(found) if found.record.first_cluster >= 2 => {
            free_chain(sd, volume, found.record.first_cluster).await
        }
        _ => Ok(()),
    }
}

pub async fn stat<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    path: &str,
) -> Result<FatDirEntry, SdFatError> {
    let mut segments = [PathSegment::EMPTY; MAX_PATH_SEGMENTS];
    if parse_path(path, &mut segments)? == 0 {
        let mut root = FatDirEntry::EMPTY;
        root.name[0] = b'/';
        root.name_len = 1;
        root.attr = ATTR_DIRECTORY;
        return Ok(root);
    }

    let (_, found) = locate_existing(sd, volume, path).await?;
    Ok(found.record.to_entry())
}
