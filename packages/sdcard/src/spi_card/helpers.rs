use crate::block::CARD_NAME_MAX;

pub(super) fn decode_capacity_bytes(csd: &[u8; 16]) -> Option<u64> {
    let csd_structure = csd_get_bits(csd, 127, 126) as u8;
    match csd_structure {
        0 => {
            // CSD v1.0 (SDSC)
            let c_size = csd_get_bits(csd, 73, 62) as u64;
            let c_size_mult = csd_get_bits(csd, 49, 47) as u64;
            let read_bl_len = csd_get_bits(csd, 83, 80) as u64;

            let block_len = 1u64.checked_shl(read_bl_len as u32)?;
            let mult = 1u64.checked_shl((c_size_mult + 2) as u32)?;
            let blocknr = (c_size + 1).checked_mul(mult)?;
            blocknr.checked_mul(block_len)
        }
        1 => {
            // CSD v2.0 (SDHC/SDXC)
            let c_size = csd_get_bits(csd, 69, 48) as u64;
            (c_size + 1).checked_mul(512 * 1024)
        }
        _ => None,
    }
}

fn csd_get_bits(csd: &[u8; 16], msb: u8, lsb: u8) -> u32 {
    let mut value = 0u32;
    for bit in (lsb..=msb).rev() {
        let byte_idx = (127 - bit) / 8;
        let bit_in_byte = bit % 8;
        let b = (csd[byte_idx as usize] >> bit_in_byte) & 1;
        value = (value << 1) | (b as u32);
    }
    value
}

/// Product name (PNM, 5 ASCII chars) and serial number (PSN) from the CID.
pub(super) fn parse_cid(cid: &[u8; 16]) -> (heapless::String<CARD_NAME_MAX>, u32) {
    let raw = &cid[3..8];
    let end = raw
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map_or(0, |idx| idx + 1);
    let mut name = heapless::String::new();
    for &byte in &raw[..end] {
        if byte.is_ascii_graphic() || byte == b' ' {
            let _ = name.push(byte as char);
        }
    }
    let serial = u32::from_be_bytes([cid[9], cid[10], cid[11], cid[12]]);
    (name, serial)
}
