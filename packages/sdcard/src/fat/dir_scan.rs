//! Walking directory chains one 32-byte slot at a time.

use alloc::vec::Vec;

use crate::block::{BlockDevice, Sector, SECTOR_SIZE};

use super::cluster_utils::{
    allocate_chain, cluster_to_lba, next_cluster, set_fat_entry, zero_cluster,
};
use super::names_lfn::{parse_path, parse_record, segment_matches_record, LfnState};
use super::types::{
    DirFound, DirLocation, FatDirEntry, FatVolume, PathSegment, SdFatError, ATTR_LONG_NAME,
    ATTR_VOLUME, DIR_ENTRIES_PER_SECTOR, DIR_ENTRY_SIZE, DOTDOT_NAME, DOT_NAME, MAX_LFN_SLOTS,
    MAX_PATH_SEGMENTS,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum SlotKind {
    /// First never-used slot; nothing after it is live.
    End,
    Deleted,
    LongName,
    Label,
    Dot,
    Entry,
}

pub(super) struct Slot {
    pub(super) location: DirLocation,
    pub(super) raw: [u8; DIR_ENTRY_SIZE],
}

impl Slot {
    pub(super) fn kind(&self) -> SlotKind {
        let attr = self.raw[11];
        match self.raw[0] {
            0x00 => SlotKind::End,
            0xE5 => SlotKind::Deleted,
            _ if attr == ATTR_LONG_NAME => SlotKind::LongName,
            _ if attr & ATTR_VOLUME != 0 => SlotKind::Label,
            _ if self.raw[..11] == DOT_NAME || self.raw[..11] == DOTDOT_NAME => SlotKind::Dot,
            _ => SlotKind::Entry,
        }
    }

    pub(super) fn short_name(&self) -> &[u8] {
        &self.raw[..11]
    }
}

/// Position in a directory's cluster chain. Reads one sector at a time and
/// hands out its slots in order.
pub(super) struct DirCursor {
    cluster: u32,
    sector_index: u32,
    slot_index: usize,
    lba: u32,
    sector: Sector,
    loaded: bool,
    hops: u32,
    finished: bool,
}

impl DirCursor {
    pub(super) fn new(dir_cluster: u32) -> Self {
        Self {
            cluster: dir_cluster,
            sector_index: 0,
            slot_index: 0,
            lba: 0,
            sector: [0; SECTOR_SIZE],
            loaded: false,
            hops: 0,
            finished: false,
        }
    }

    /// The next slot, or `None` once the chain runs out.
    pub(super) async fn next<D: BlockDevice>(
        &mut self,
        sd: &mut D,
        volume: &FatVolume,
    ) -> Result<Option<Slot>, SdFatError> {
        while !self.finished {
            if !self.loaded {
                self.lba = cluster_to_lba(volume, self.cluster)? + self.sector_index;
                sd.read_sector(self.lba, &mut self.sector).await?;
                self.loaded = true;
                self.slot_index = 0;
            }
            if self.slot_index < DIR_ENTRIES_PER_SECTOR {
                let start = self.slot_index * DIR_ENTRY_SIZE;
                let mut raw = [0u8; DIR_ENTRY_SIZE];
                raw.copy_from_slice(&self.sector[start..start + DIR_ENTRY_SIZE]);
                let location = DirLocation {
                    lba: self.lba,
                    slot: self.slot_index as u8,
                };
                self.slot_index += 1;
                return Ok(Some(Slot { location, raw }));
            }

            self.loaded = false;
            self.sector_index += 1;
            if self.sector_index < volume.sectors_per_cluster as u32 {
                continue;
            }
            self.sector_index = 0;
            match next_cluster(sd, volume, self.cluster).await? {
                Some(next) => {
                    self.hops += 1;
                    if self.hops > volume.chain_limit() {
                        return Err(SdFatError::ClusterChainTooLong);
                    }
                    self.cluster = next;
                }
                None => self.finished = true,
            }
        }
        Ok(None)
    }
}

/// Parent directory cluster, final path segment and the entry it names, if any.
pub(super) struct Located {
    pub(super) parent_cluster: u32,
    pub(super) name: PathSegment,
    pub(super) found: Option<DirFound>,
}

pub(super) async fn locate<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    path: &str,
) -> Result<Located, SdFatError> {
    let mut segments = [PathSegment::EMPTY; MAX_PATH_SEGMENTS];
    let count = parse_path(path, &mut segments)?;
    let Some((name, parents)) = segments[..count].split_last() else {
        return Err(SdFatError::InvalidPath);
    };
    let parent_cluster = walk_dirs(sd, volume, parents).await?;
    let found = find_entry(sd, volume, parent_cluster, name).await?;
    Ok(Located {
        parent_cluster,
        name: *name,
        found,
    })
}

pub(super) async fn locate_existing<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    path: &str,
) -> Result<(u32, DirFound), SdFatError> {
    let located = locate(sd, volume, path).await?;
    let found = located.found.ok_or(SdFatError::NotFound)?;
    Ok((located.parent_cluster, found))
}

/// First cluster of the directory `path` names.
pub(super) async fn resolve_path_dir<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    path: &str,
) -> Result<u32, SdFatError> {
    let mut segments = [PathSegment::EMPTY; MAX_PATH_SEGMENTS];
    let count = parse_path(path, &mut segments)?;
    walk_dirs(sd, volume, &segments[..count]).await
}

async fn walk_dirs<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    segments: &[PathSegment],
) -> Result<u32, SdFatError> {
    let mut cluster = volume.root_cluster;
    for segment in segments {
        let found = find_entry(sd, volume, cluster, segment)
            .await?
            .ok_or(SdFatError::NotFound)?;
        if !found.record.is_dir() {
            return Err(SdFatError::NotDirectory);
        }
        // `..` entries pointing at the root store cluster 0.
        cluster = match found.record.first_cluster {
            0 | 1 => volume.root_cluster,
            first => first,
        };
    }
    Ok(cluster)
}

async fn find_entry<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    dir_cluster: u32,
    name: &PathSegment,
) -> Result<Option<DirFound>, SdFatError> {
    let mut cursor = DirCursor::new(dir_cluster);
    let mut lfn = LfnState::new();
    while let Some(slot) = cursor.next(sd, volume).await? {
        match slot.kind() {
            SlotKind::End => break,
            SlotKind::LongName => {
                lfn.accept(slot.location, &slot.raw);
                continue;
            }
            SlotKind::Entry | SlotKind::Dot => {
                let record = parse_record(&slot.raw, &lfn);
                if segment_matches_record(name, &record) {
                    let lfn_count = lfn.run_for(&record.short_name).unwrap_or(0);
                    let mut lfn_locations = [DirLocation::ZERO; MAX_LFN_SLOTS];
                    lfn_locations[..lfn_count].copy_from_slice(&lfn.locations()[..lfn_count]);
                    return Ok(Some(DirFound {
                        short_location: slot.location,
                        lfn_locations,
                        lfn_count: lfn_count as u8,
                        record,
                    }));
                }
            }
            SlotKind::Deleted | SlotKind::Label => {}
        }
        lfn.clear();
    }
    Ok(None)
}

/// `needed` consecutive free slots in the directory, adding a zeroed
/// cluster to its chain when none are left.
pub(super) async fn reserve_directory_slots<D: BlockDevice>(
    sd: &mut D,
    volume: &mut FatVolume,
    dir_cluster: u32,
    needed: usize,
) -> Result<[DirLocation; MAX_LFN_SLOTS + 1], SdFatError> {
    loop {
        if let Some(run) = find_free_run(sd, volume, dir_cluster, needed).await? {
            return Ok(run);
        }
        grow_directory(sd, volume, dir_cluster).await?;
    }
}

async fn find_free_run<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    dir_cluster: u32,
    needed: usize,
) -> Result<Option<[DirLocation; MAX_LFN_SLOTS + 1]>, SdFatError> {
    let mut run = [DirLocation::ZERO; MAX_LFN_SLOTS + 1];
    let mut len = 0usize;
    let mut past_end = false;
    let mut cursor = DirCursor::new(dir_cluster);
    while let Some(slot) = cursor.next(sd, volume).await? {
        let kind = slot.kind();
        past_end |= kind == SlotKind::End;
        if !past_end && kind != SlotKind::Deleted {
            len = 0;
            continue;
        }
        run[len] = slot.location;
        len += 1;
        if len == needed {
            return Ok(Some(run));
        }
    }
    Ok(None)
}

async fn grow_directory<D: BlockDevice>(
    sd: &mut D,
    volume: &mut FatVolume,
    dir_cluster: u32,
) -> Result<(), SdFatError> {
    let mut tail = dir_cluster;
    let mut hops = 0u32;
    while let Some(next) = next_cluster(sd, volume, tail).await? {
        hops += 1;
        if hops > volume.chain_limit() {
            return Err(SdFatError::ClusterChainTooLong);
        }
        tail = next;
    }

    let added = allocate_chain(sd, volume, 1).await?;
    zero_cluster(sd, volume, added).await?;
    set_fat_entry(sd, volume, tail, added).await
}

/// Live entries of a directory, without `.`, `..` and the volume label.
/// Gives up between sectors once the volume's deadline has passed.
pub(super) async fn collect_entries<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    dir_cluster: u32,
) -> Result<Vec<FatDirEntry>, SdFatError> {
    let mut entries = Vec::new();
    let mut lfn = LfnState::new();
    let mut cursor = DirCursor::new(dir_cluster);
    while let Some(slot) = cursor.next(sd, volume).await? {
        if slot.location.slot == 0 {
            volume.check_deadline()?;
        }
        match slot.kind() {
            SlotKind::End => break,
            SlotKind::LongName => {
                lfn.accept(slot.location, &slot.raw);
                continue;
            }
            SlotKind::Entry => entries.push(parse_record(&slot.raw, &lfn).to_entry()),
            SlotKind::Deleted | SlotKind::Label | SlotKind::Dot => {}
        }
        lfn.clear();
    }
    Ok(entries)
}
