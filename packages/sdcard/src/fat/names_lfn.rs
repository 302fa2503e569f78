//! Name handling: path splitting, 8.3 encoding and VFAT long-name slots.

use core::fmt::Write;

use heapless::String;

use super::time::FatTimestamp;
use super::types::{
    DirLocation, DirRecord, PathSegment, SdFatError, ATTR_LONG_NAME, DIR_ENTRY_SIZE,
    FAT_NAME_MAX, MAX_LFN_SLOTS, MAX_PATH_SEGMENTS,
};

/// Where the 13 UTF-16 units of a long-name slot sit inside it.
const LFN_UNIT_OFFSETS: [usize; 13] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];
const UNITS_PER_SLOT: usize = LFN_UNIT_OFFSETS.len();
const LAST_SLOT_FLAG: u8 = 0x40;
const SEQUENCE_MASK: u8 = 0x1F;
const LOWER_BASE: u8 = 0x08;
const LOWER_EXT: u8 = 0x10;
const LFN_FORBIDDEN: [u16; 9] = [0x22, 0x2A, 0x2F, 0x3A, 0x3C, 0x3E, 0x3F, 0x5C, 0x7C];

/// Splits an absolute or relative path into its non-empty segments.
pub(super) fn parse_path(
    path: &str,
    out: &mut [PathSegment; MAX_PATH_SEGMENTS],
) -> Result<usize, SdFatError> {
    let mut count = 0usize;
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        if matches!(segment, "." | "..") {
            return Err(SdFatError::InvalidPath);
        }
        let slot = out.get_mut(count).ok_or(SdFatError::PathTooDeep)?;
        let bytes = segment.as_bytes();
        if bytes.len() > FAT_NAME_MAX {
            return Err(SdFatError::NameTooLong);
        }
        *slot = PathSegment::EMPTY;
        slot.name[..bytes.len()].copy_from_slice(bytes);
        slot.len = bytes.len() as u8;
        count += 1;
    }
    Ok(count)
}

/// Long-name slots seen since the last short entry.
///
/// Slots arrive highest sequence first; the run only counts once every
/// sequence number up to the one flagged last has been seen.
#[derive(Clone, Copy)]
pub(super) struct LfnState {
    expected: u8,
    checksum: u8,
    seen: u32,
    units: [[u16; UNITS_PER_SLOT]; MAX_LFN_SLOTS],
    locations: [DirLocation; MAX_LFN_SLOTS],
}

impl LfnState {
    pub(super) fn new() -> Self {
        Self {
            expected: 0,
            checksum: 0,
            seen: 0,
            units: [[0xFFFF; UNITS_PER_SLOT]; MAX_LFN_SLOTS],
            locations: [DirLocation::ZERO; MAX_LFN_SLOTS],
        }
    }

    pub(super) fn clear(&mut self) {
        *self = Self::new();
    }

    pub(super) fn accept(&mut self, location: DirLocation, raw: &[u8; DIR_ENTRY_SIZE]) {
        let sequence = raw[0] & SEQUENCE_MASK;
        if sequence == 0 || usize::from(sequence) > MAX_LFN_SLOTS {
            self.clear();
            return;
        }
        if raw[0] & LAST_SLOT_FLAG != 0 {
            self.clear();
            self.expected = sequence;
            self.checksum = raw[13];
        } else if self.expected == 0 || sequence > self.expected || raw[13] != self.checksum {
            self.clear();
            return;
        }

        let index = usize::from(sequence - 1);
        for (unit, &offset) in self.units[index].iter_mut().zip(&LFN_UNIT_OFFSETS) {
            *unit = u16::from_le_bytes([raw[offset], raw[offset + 1]]);
        }
        self.locations[index] = location;
        self.seen |= 1 << index;
    }

    /// Slot count of a complete run that belongs to `short`.
    pub(super) fn run_for(&self, short: &[u8; 11]) -> Option<usize> {
        let slots = usize::from(self.expected);
        let complete = slots > 0 && self.seen == (1u32 << slots) - 1;
        (complete && self.checksum == short_name_checksum(short)).then_some(slots)
    }

    pub(super) fn locations(&self) -> &[DirLocation; MAX_LFN_SLOTS] {
        &self.locations
    }

    fn decode(&self, slots: usize, out: &mut [u8; FAT_NAME_MAX]) -> usize {
        let units = self.units[..slots]
            .iter()
            .flatten()
            .copied()
            .take_while(|&unit| unit != 0x0000 && unit != 0xFFFF);
        let mut len = 0usize;
        for ch in char::decode_utf16(units) {
            let ch = ch.unwrap_or(char::REPLACEMENT_CHARACTER);
            let width = ch.len_utf8();
            if len + width > out.len() {
                break;
            }
            ch.encode_utf8(&mut out[len..len + width]);
            len += width;
        }
        len
    }
}

/// The name an entry shows: its long name when `lfn` holds a matching run,
/// otherwise the 8.3 name. Also returns how many long-name slots it used.
pub(super) fn display_name(
    lfn: &LfnState,
    short: &[u8; 11],
    case_flags: u8,
) -> ([u8; FAT_NAME_MAX], usize, usize) {
    let mut out = [0u8; FAT_NAME_MAX];
    if let Some(slots) = lfn.run_for(short) {
        let len = lfn.decode(slots, &mut out);
        if len > 0 {
            return (out, len, slots);
        }
    }
    let len = short_name_to_text(short, case_flags, &mut out);
    (out, len, 0)
}

pub(super) fn parse_record(raw: &[u8; DIR_ENTRY_SIZE], lfn: &LfnState) -> DirRecord {
    let mut short_name = [0u8; 11];
    short_name.copy_from_slice(&raw[..11]);
    let high = u16::from_le_bytes([raw[20], raw[21]]) as u32;
    let low = u16::from_le_bytes([raw[26], raw[27]]) as u32;
    let (name, len, _) = display_name(lfn, &short_name, raw[12]);
    DirRecord {
        short_name,
        display_name: name,
        display_name_len: len as u8,
        attr: raw[11],
        case_flags: raw[12] & (LOWER_BASE | LOWER_EXT),
        first_cluster: (high << 16) | low,
        size: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
        modified: FatTimestamp::read(raw, 22, 24),
    }
}

/// Case-insensitive match against the long name or the rendered 8.3 name.
pub(super) fn segment_matches_record(segment: &PathSegment, record: &DirRecord) -> bool {
    let wanted = segment.as_bytes();
    let shown = &record.display_name[..usize::from(record.display_name_len)];
    if wanted.eq_ignore_ascii_case(shown) {
        return true;
    }
    let mut short = [0u8; 12];
    let len = short_name_to_text(&record.short_name, 0, &mut short);
    wanted.eq_ignore_ascii_case(&short[..len])
}

pub(super) fn short_name_checksum(short: &[u8; 11]) -> u8 {
    short
        .iter()
        .fold(0u8, |sum, &byte| sum.rotate_right(1).wrapping_add(byte))
}

/// Long-name slot `sequence` (1-based) of `name`, padded the way VFAT
/// expects: one NUL after the last unit, 0xFFFF after that.
pub(super) fn build_lfn_entry(
    sequence: u8,
    is_last: bool,
    checksum: u8,
    name: &[u16],
) -> [u8; DIR_ENTRY_SIZE] {
    let mut raw = [0xFFu8; DIR_ENTRY_SIZE];
    raw[0] = if is_last {
        sequence | LAST_SLOT_FLAG
    } else {
        sequence
    };
    raw[11] = ATTR_LONG_NAME;
    raw[12] = 0;
    raw[13] = checksum;
    raw[26..28].fill(0);

    let first = usize::from(sequence - 1) * UNITS_PER_SLOT;
    for (index, &offset) in LFN_UNIT_OFFSETS.iter().enumerate() {
        let position = first + index;
        let unit = match name.get(position) {
            Some(&unit) => unit,
            None if position == name.len() => 0x0000,
            None => 0xFFFF,
        };
        raw[offset..offset + 2].copy_from_slice(&unit.to_le_bytes());
    }
    raw
}

pub(super) fn lfn_slots_for(utf16_len: usize) -> usize {
    utf16_len.div_ceil(UNITS_PER_SLOT)
}

pub(super) fn encode_utf16_name(
    desired: &[u8],
    out: &mut [u16; MAX_LFN_SLOTS * UNITS_PER_SLOT],
) -> Result<usize, SdFatError> {
    let text = core::str::from_utf8(desired).map_err(|_| SdFatError::InvalidLongName)?;
    let mut len = 0usize;
    for unit in text.encode_utf16() {
        if unit < 0x20 || LFN_FORBIDDEN.contains(&unit) {
            return Err(SdFatError::InvalidLongName);
        }
        *out.get_mut(len).ok_or(SdFatError::NameTooLong)? = unit;
        len += 1;
    }
    if len == 0 {
        return Err(SdFatError::InvalidPath);
    }
    Ok(len)
}

/// Exact 8.3 form of `segment`, if it has one.
pub(super) fn encode_short_name(segment: &[u8]) -> Result<[u8; 11], SdFatError> {
    let (base, ext) = match segment.iter().position(|&b| b == b'.') {
        Some(dot) => (&segment[..dot], Some(&segment[dot + 1..])),
        None => (segment, None),
    };
    let ext_bytes = ext.unwrap_or(&[]);
    if base.is_empty()
        || base.len() > 8
        || ext_bytes.len() > 3
        || matches!(ext, Some([]))
        || ext_bytes.contains(&b'.')
    {
        return Err(SdFatError::InvalidShortName);
    }

    let mut raw = [b' '; 11];
    for (dst, &byte) in raw[..8].iter_mut().zip(base) {
        *dst = short_char(byte)?;
    }
    for (dst, &byte) in raw[8..].iter_mut().zip(ext_bytes) {
        *dst = short_char(byte)?;
    }
    Ok(raw)
}

/// `BASE~N.EXT` alias for a name that has no exact 8.3 form.
pub(super) fn make_short_alias(name: &[u8], attempt: u32) -> [u8; 11] {
    let (base, ext) = match name.iter().rposition(|&b| b == b'.') {
        Some(dot) => (&name[..dot], &name[dot + 1..]),
        None => (name, &[][..]),
    };

    let mut raw = [b' '; 11];
    for (dst, &byte) in raw[8..].iter_mut().zip(ext) {
        *dst = short_char(byte).unwrap_or(b'_');
    }

    let mut tail: String<12> = String::new();
    let _ = write!(tail, "~{}", attempt.max(1));
    let keep = 8usize.saturating_sub(tail.len());

    let mut len = 0usize;
    for &byte in base.iter().filter(|&&b| b != b' ' && b != b'.').take(keep) {
        raw[len] = short_char(byte).unwrap_or(b'_');
        len += 1;
    }
    if len == 0 {
        for &byte in b"FILE".iter().take(keep) {
            raw[len] = byte;
            len += 1;
        }
    }
    for &byte in tail.as_bytes().iter().take(8 - len) {
        raw[len] = byte;
        len += 1;
    }
    raw
}

/// NT lowercase flags that let `desired` render exactly from its 8.3 form.
/// `None` when a part mixes cases and needs a long name.
pub(super) fn short_case_flags(desired: &[u8]) -> Option<u8> {
    fn lower_flag(part: &[u8], flag: u8) -> Option<u8> {
        let lower = part.iter().any(u8::is_ascii_lowercase);
        let upper = part.iter().any(u8::is_ascii_uppercase);
        match (lower, upper) {
            (true, true) => None,
            (true, false) => Some(flag),
            (false, _) => Some(0),
        }
    }
    let (base, ext) = match desired.iter().position(|&b| b == b'.') {
        Some(dot) => (&desired[..dot], &desired[dot + 1..]),
        None => (desired, &[][..]),
    };
    Some(lower_flag(base, LOWER_BASE)? | lower_flag(ext, LOWER_EXT)?)
}

fn short_char(byte: u8) -> Result<u8, SdFatError> {
    match byte.to_ascii_uppercase() {
        up @ (b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'-' | b'$' | b'~' | b'!' | b'#') => Ok(up),
        _ => Err(SdFatError::InvalidShortName),
    }
}

/// `NAME.EXT` text of a raw 8.3 name, lowercasing the parts `case_flags`
/// marks. Returns the number of bytes written.
pub(super) fn short_name_to_text(raw: &[u8; 11], case_flags: u8, out: &mut [u8]) -> usize {
    let fold = |byte: u8, flag: u8| {
        if case_flags & flag != 0 {
            byte.to_ascii_lowercase()
        } else {
            byte
        }
    };
    let base = raw[..8]
        .iter()
        .take_while(|&&b| b != b' ')
        .map(|&b| fold(b, LOWER_BASE));
    let ext_len = raw[8..].iter().take_while(|&&b| b != b' ').count();
    let dot = (ext_len > 0).then_some(b'.');
    let ext = raw[8..8 + ext_len].iter().map(|&b| fold(b, LOWER_EXT));

    let mut len = 0usize;
    for (dst, byte) in out.iter_mut().zip(base.chain(dot).chain(ext)) {
        *dst = byte;
        len += 1;
    }
    len
}
