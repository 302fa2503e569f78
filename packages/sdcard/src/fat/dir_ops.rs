use crate::block::{BlockDevice, SECTOR_SIZE};

use super::cluster_utils::{cluster_to_lba, zero_cluster};
use super::dir_scan::{reserve_directory_slots, DirCursor, SlotKind};
use super::names_lfn::{
    build_lfn_entry, encode_short_name, encode_utf16_name, lfn_slots_for, make_short_alias,
    short_case_flags, short_name_checksum,
};
use super::time::FatTimestamp;
use super::types::{
    DirFound, DirLocation, DirRecord, FatVolume, PathSegment, SdFatError, ATTR_DIRECTORY,
    DIR_ENTRY_SIZE, DOTDOT_NAME, DOT_NAME, MAX_LFN_SLOTS,
};

struct NewName {
    short_name: [u8; 11],
    case_flags: u8,
    lfn: [u16; MAX_LFN_SLOTS * 13],
    lfn_len: usize,
}

async fn short_name_exists<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    dir_cluster: u32,
    short_name: &[u8; 11],
) -> Result<bool, SdFatError> {
    let mut cursor = DirCursor::new(dir_cluster);
    while let Some(slot) = cursor.next(sd, volume).await? {
        match slot.kind() {
            SlotKind::End => break,
            SlotKind::Entry | SlotKind::Dot if slot.short_name() == short_name => {
                return Ok(true)
            }
            _ => {}
        }
    }
    Ok(false)
}

/// Picks the on-disk names for `desired`: a plain 8.3 entry when the name
/// fits, else a long name plus a unique `~N` alias.
async fn select_new_entry_name<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    parent_cluster: u32,
    desired: &[u8],
) -> Result<NewName, SdFatError> {
    let mut lfn = [0u16; MAX_LFN_SLOTS * 13];
    let lfn_len = encode_utf16_name(desired, &mut lfn)?;

    if let Ok(short) = encode_short_name(desired) {
        if !short_name_exists(sd, volume, parent_cluster, &short).await? {
            return Ok(match short_case_flags(desired) {
                Some(case_flags) => NewName {
                    short_name: short,
                    case_flags,
                    lfn,
                    lfn_len: 0,
                },
                None => NewName {
                    short_name: short,
                    case_flags: 0,
                    lfn,
                    lfn_len,
                },
            });
        }
    }

    for attempt in 1..10_000 {
        let short = make_short_alias(desired, attempt);
        if !short_name_exists(sd, volume, parent_cluster, &short).await? {
            return Ok(NewName {
                short_name: short,
                case_flags: 0,
                lfn,
                lfn_len,
            });
        }
    }

    Err(SdFatError::DirFull)
}

async fn write_dir_slot<D: BlockDevice>(
    sd: &mut D,
    location: &DirLocation,
    entry: &[u8; DIR_ENTRY_SIZE],
) -> Result<(), SdFatError> {
    let mut sector = [0u8; SECTOR_SIZE];
    sd.read_sector(location.lba, &mut sector).await?;
    let base = location.slot as usize * DIR_ENTRY_SIZE;
    sector[base..base + DIR_ENTRY_SIZE].copy_from_slice(entry);
    sd.write_sector(location.lba, &sector).await?;
    Ok(())
}

fn encode_directory_entry(record: &DirRecord) -> [u8; DIR_ENTRY_SIZE] {
    let mut entry = [0u8; DIR_ENTRY_SIZE];
    entry[..11].copy_from_slice(&record.short_name);
    entry[11] = record.attr;
    entry[12] = record.case_flags;
    let time = record.modified.time.to_le_bytes();
    let date = record.modified.date.to_le_bytes();
    entry[14..16].copy_from_slice(&time);
    entry[16..18].copy_from_slice(&date);
    entry[18..20].copy_from_slice(&date);
    entry[20..22].copy_from_slice(&((record.first_cluster >> 16) as u16).to_le_bytes());
    entry[22..24].copy_from_slice(&time);
    entry[24..26].copy_from_slice(&date);
    entry[26..28].copy_from_slice(&(record.first_cluster as u16).to_le_bytes());
    entry[28..32].copy_from_slice(&record.size.to_le_bytes());
    entry
}

pub(super) async fn write_directory_entry<D: BlockDevice>(
    sd: &mut D,
    location: &DirLocation,
    record: &DirRecord,
) -> Result<(), SdFatError> {
    write_dir_slot(sd, location, &encode_directory_entry(record)).await
}

async fn write_new_entry<D: BlockDevice>(
    sd: &mut D,
    slots: &[DirLocation],
    record: &DirRecord,
    lfn_utf16: &[u16],
) -> Result<(), SdFatError> {
    let lfn_slots = slots.len().saturating_sub(1);
    let checksum = short_name_checksum(&record.short_name);

    // Long-name slots go highest sequence first, directly before the 8.3 entry.
    for (idx, location) in slots[..lfn_slots].iter().enumerate() {
        let seq = (lfn_slots - idx) as u8;
        let entry = build_lfn_entry(seq, idx == 0, checksum, lfn_utf16);
        write_dir_slot(sd, location, &entry).await?;
    }

    write_directory_entry(sd, &slots[lfn_slots], record).await
}

/// Adds a directory entry named `name` to `parent_cluster`, growing the
/// directory when it has no room for the long-name run.
pub(super) async fn create_entry<D: BlockDevice>(
    sd: &mut D,
    volume: &mut FatVolume,
    parent_cluster: u32,
    name: &PathSegment,
    body: DirRecord,
) -> Result<(), SdFatError> {
    let new_name = select_new_entry_name(sd, volume, parent_cluster, name.as_bytes()).await?;
    let needed_slots = lfn_slots_for(new_name.lfn_len) + 1;
    let free_slots = reserve_directory_slots(sd, volume, parent_cluster, needed_slots).await?;
    write_new_entry(
        sd,
        &free_slots[..needed_slots],
        &DirRecord {
            short_name: new_name.short_name,
            display_name: name.name,
            display_name_len: name.len,
            case_flags: new_name.case_flags,
            ..body
        },
        &new_name.lfn[..new_name.lfn_len],
    )
    .await
}

pub(super) async fn mark_found_deleted<D: BlockDevice>(
    sd: &mut D,
    found: &DirFound,
) -> Result<(), SdFatError> {
    for location in &found.lfn_locations[..found.lfn_count as usize] {
        mark_slot_deleted(sd, location).await?;
    }
    mark_slot_deleted(sd, &found.short_location).await
}

async fn mark_slot_deleted<D: BlockDevice>(
    sd: &mut D,
    location: &DirLocation,
) -> Result<(), SdFatError> {
    let mut sector = [0u8; SECTOR_SIZE];
    sd.read_sector(location.lba, &mut sector).await?;
    sector[location.slot as usize * DIR_ENTRY_SIZE] = 0xE5;
    sd.write_sector(location.lba, &sector).await?;
    Ok(())
}

pub(super) async fn is_directory_empty<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    dir_cluster: u32,
) -> Result<bool, SdFatError> {
    let mut cursor = DirCursor::new(dir_cluster);
    while let Some(slot) = cursor.next(sd, volume).await? {
        match slot.kind() {
            SlotKind::End => break,
            SlotKind::Entry => return Ok(false),
            _ => {}
        }
    }
    Ok(true)
}

fn dot_record(short_name: [u8; 11], cluster: u32, modified: FatTimestamp) -> DirRecord {
    DirRecord {
        short_name,
        ..DirRecord::unnamed(ATTR_DIRECTORY, cluster, 0, modified)
    }
}

/// Zeroes a fresh directory cluster and writes its `.` and `..` entries.
/// A parent that is the root directory is recorded as cluster 0.
pub(super) async fn initialize_directory_cluster<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    dir_cluster: u32,
    parent_cluster: u32,
) -> Result<(), SdFatError> {
    zero_cluster(sd, volume, dir_cluster).await?;

    let parent = if parent_cluster == volume.root_cluster {
        0
    } else {
        parent_cluster
    };
    let first_lba = cluster_to_lba(volume, dir_cluster)?;
    let mut sector = [0u8; SECTOR_SIZE];
    sector[..DIR_ENTRY_SIZE]
        .copy_from_slice(&encode_directory_entry(&dot_record(DOT_NAME, dir_cluster, volume.now)));
    sector[DIR_ENTRY_SIZE..DIR_ENTRY_SIZE * 2]
        .copy_from_slice(&encode_directory_entry(&dot_record(DOTDOT_NAME, parent, volume.now)));
    sd.write_sector(first_lba, &sector).await?;
    Ok(())
}

/// Re-points the `..` entry of a moved directory at its new parent.
pub(super) async fn set_parent_link<D: BlockDevice>(
    sd: &mut D,
    volume: &FatVolume,
    dir_cluster: u32,
    parent_cluster: u32,
) -> Result<(), SdFatError> {
    let parent = if parent_cluster == volume.root_cluster {
        0
    } else {
        parent_cluster
    };
    let lba = cluster_to_lba(volume, dir_cluster)?;
    let mut sector = [0u8; SECTOR_SIZE];
    sd.read_sector(lba, &mut sector).await?;
    let base = DIR_ENTRY_SIZE;
    if sector[base..base + 11] != DOTDOT_NAME {
        return Ok(());
    }
    sector[base + 20..base + 22].copy_from_slice(&((parent >> 16) as u16).to_le_bytes());
    sector[base + 26..base + 28].copy_from_slice(&(parent as u16).to_le_bytes());
    sd.write_sector(lba, &sector).await?;
    Ok(())
}
