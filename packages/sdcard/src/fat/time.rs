/// Packed FAT date/time pair as stored in a directory entry.
///
/// Two-second resolution, local time, years 1980..=2107.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct FatTimestamp {
    pub date: u16,
    pub time: u16,
}

const FAT_EPOCH_UNIX: u32 = 315_532_800;
const FAT_LAST_YEAR: i64 = 2107;

impl FatTimestamp {
    /// 1980-01-01 00:00:00.
    pub const EPOCH: Self = Self {
        date: (1 << 5) | 1,
        time: 0,
    };

    pub fn from_unix(secs: u32) -> Self {
        if secs <= FAT_EPOCH_UNIX {
            return Self::EPOCH;
        }
        let days = (secs / 86_400) as i64;
        let rem = secs % 86_400;
        let (mut year, mut month, mut day) = civil_from_days(days);
        let (mut hour, mut minute, mut second) = (rem / 3600, (rem % 3600) / 60, rem % 60);
        if year > FAT_LAST_YEAR {
            year = FAT_LAST_YEAR;
            month = 12;
            day = 31;
            hour = 23;
            minute = 59;
            second = 58;
        }
        Self {
            date: (((year - 1980) as u16) << 9) | ((month as u16) << 5) | day as u16,
            time: ((hour as u16) << 11) | ((minute as u16) << 5) | (second / 2) as u16,
        }
    }

    pub fn to_unix(self) -> u32 {
        let year = 1980 + (self.date >> 9) as i64;
        let month = ((self.date >> 5) & 0x0F).clamp(1, 12) as u32;
        let day = (self.date & 0x1F).max(1) as u32;
        let hour = (self.time >> 11) as u32;
        let minute = ((self.time >> 5) & 0x3F) as u32;
        let second = ((self.time & 0x1F) * 2) as u32;
        let days = days_from_civil(year, month, day);
        (days as u32)
            .saturating_mul(86_400)
            .saturating_add(hour * 3600 + minute * 60 + second)
    }

    pub(super) fn read(entry: &[u8], time_off: usize, date_off: usize) -> Self {
        Self {
            time: u16::from_le_bytes([entry[time_off], entry[time_off + 1]]),
            date: u16::from_le_bytes([entry[date_off], entry[date_off + 1]]),
        }
    }
}

// Howard Hinnant's civil calendar conversions, restricted to dates after 1970.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let m = month as i64;
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}
