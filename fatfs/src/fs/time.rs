//! FAT Timestamps
//!
//! FAT stores local time as a packed date and time word:
//!
//! ```text
//!   date: |15      9|8   5|4     0|     time: |15  11|10    5|4      0|
//!         | yr-1980 | mon |  day  |           | hour |  min  | sec/2  |
//! ```
//!
//! The engine asks for "now" as `(date << 16) | time`. Conversion to and
//! from Unix seconds is done here against a pluggable [`Clock`].

/// Earliest representable instant, 1980-01-01 00:00:00
pub const FAT_EPOCH_UNIX: i64 = 315_532_800;

/// Last representable year
const FAT_MAX_YEAR: i64 = 2107;

/// First instant past the FAT range, 2108-01-01 00:00:00
const FAT_END_UNIX: i64 = 4_354_819_200;

const SECS_PER_DAY: i64 = 86_400;

const DAYS_IN_MONTH: [i64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Wall-clock source for file timestamps
pub trait Clock: Send {
    /// Seconds since 1970-01-01 00:00:00
    fn unix_secs(&self) -> i64;
}

/// Clock that always reports the FAT epoch
#[derive(Debug, Clone, Copy, Default)]
pub struct NullClock;

impl Clock for NullClock {
    fn unix_secs(&self) -> i64 {
        FAT_EPOCH_UNIX
    }
}

/// Clock frozen at a given instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn unix_secs(&self) -> i64 {
        self.0
    }
}

/// Broken-down calendar time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeFields {
    pub year: i64,
    /// 1..=12
    pub month: i64,
    /// 1..=31
    pub day: i64,
    pub hour: i64,
    pub minute: i64,
    pub second: i64,
}

pub fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

pub fn days_in_month(year: i64, month: i64) -> i64 {
    if month == 2 && is_leap_year(year) {
        29
    } else {
        DAYS_IN_MONTH[(month.clamp(1, 12) - 1) as usize]
    }
}

fn days_in_year(year: i64) -> i64 {
    if is_leap_year(year) {
        366
    } else {
        365
    }
}

/// Split Unix seconds (not before 1970) into calendar fields
pub fn time_fields(unix: i64) -> TimeFields {
    let unix = unix.max(0);
    let mut days = unix / SECS_PER_DAY;
    let rem = unix % SECS_PER_DAY;

    let mut year = 1970;
    while days >= days_in_year(year) {
        days -= days_in_year(year);
        year += 1;
    }

    let mut month = 1;
    while days >= days_in_month(year, month) {
        days -= days_in_month(year, month);
        month += 1;
    }

    TimeFields {
        year,
        month,
        day: days + 1,
        hour: rem / 3600,
        minute: (rem / 60) % 60,
        second: rem % 60,
    }
}

/// Unix seconds for calendar fields (years from 1970)
pub fn unix_time(tf: &TimeFields) -> i64 {
    let mut days = 0;
    for year in 1970..tf.year {
        days += days_in_year(year);
    }
    for month in 1..tf.month.clamp(1, 12) {
        days += days_in_month(tf.year, month);
    }
    days += tf.day.max(1) - 1;

    days * SECS_PER_DAY + tf.hour * 3600 + tf.minute * 60 + tf.second
}

/// Pack Unix seconds as `(date << 16) | time`.
///
/// Instants before 1980 pack to 0; instants past 2107 pack to the last
/// representable second.
pub fn fat_time_from_unix(unix: i64) -> u32 {
    if unix < FAT_EPOCH_UNIX {
        return 0;
    }
    let tf = if unix >= FAT_END_UNIX {
        TimeFields {
            year: FAT_MAX_YEAR,
            month: 12,
            day: 31,
            hour: 23,
            minute: 59,
            second: 58,
        }
    } else {
        time_fields(unix)
    };

    (((tf.year - 1980) as u32) << 25)
        | ((tf.month as u32) << 21)
        | ((tf.day as u32) << 16)
        | ((tf.hour as u32) << 11)
        | ((tf.minute as u32) << 5)
        | ((tf.second as u32) / 2)
}

/// Unix seconds for a FAT date and time word
pub fn unix_from_fat(fdate: u16, ftime: u16) -> i64 {
    let tf = TimeFields {
        year: 1980 + (fdate >> 9) as i64,
        month: ((fdate >> 5) & 0x0F) as i64,
        day: (fdate & 0x1F) as i64,
        hour: (ftime >> 11) as i64,
        minute: ((ftime >> 5) & 0x3F) as i64,
        second: ((ftime & 0x1F) * 2) as i64,
    };
    unix_time(&tf)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-02-29 13:45:30 UTC
    const LEAP_DAY: i64 = 1_709_214_330;

    #[test]
    fn test_time_fields() {
        let tf = time_fields(LEAP_DAY);
        assert_eq!(
            tf,
            TimeFields { year: 2024, month: 2, day: 29, hour: 13, minute: 45, second: 30 }
        );
        assert_eq!(unix_time(&tf), LEAP_DAY);
    }

    #[test]
    fn test_pack() {
        let packed = fat_time_from_unix(LEAP_DAY);
        assert_eq!(packed >> 25, 44);
        assert_eq!((packed >> 21) & 0x0F, 2);
        assert_eq!((packed >> 16) & 0x1F, 29);
        assert_eq!((packed >> 11) & 0x1F, 13);
        assert_eq!((packed >> 5) & 0x3F, 45);
        assert_eq!(packed & 0x1F, 15);
    }

    #[test]
    fn test_unpack_truncates_to_two_seconds() {
        let packed = fat_time_from_unix(LEAP_DAY + 1);
        let unix = unix_from_fat((packed >> 16) as u16, packed as u16);
        assert_eq!(unix, LEAP_DAY);
    }

    #[test]
    fn test_before_fat_epoch_packs_to_zero() {
        assert_eq!(fat_time_from_unix(0), 0);
        assert_eq!(fat_time_from_unix(-1), 0);
        assert_eq!(fat_time_from_unix(FAT_EPOCH_UNIX - 1), 0);
        assert_eq!(fat_time_from_unix(FAT_EPOCH_UNIX), 0x0021_0000);
        assert_eq!(unix_from_fat(0x0021, 0), FAT_EPOCH_UNIX);
        assert_eq!(fat_time_from_unix(NullClock.unix_secs()), 0x0021_0000);
    }

    #[test]
    fn test_past_fat_range_packs_to_last_second() {
        // 2107-12-31 23:59:58
        let last = (127 << 25) | (12 << 21) | (31 << 16) | (23 << 11) | (59 << 5) | 29;
        assert_eq!(fat_time_from_unix(FAT_END_UNIX - 2), last);
        assert_eq!(fat_time_from_unix(FAT_END_UNIX), last);
        assert_eq!(fat_time_from_unix(i64::MAX), last);
        assert_eq!(unix_from_fat((last >> 16) as u16, last as u16), FAT_END_UNIX - 2);
    }

    #[test]
    fn test_leap_years() {
        assert!(is_leap_year(2000));
        assert!(!is_leap_year(1900));
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(2024, 2), 29);
    }
}
