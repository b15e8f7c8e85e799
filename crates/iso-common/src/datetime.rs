//! The two date encodings Ecma-119 uses: the 17-byte ASCII volume
//! descriptor timestamp (8.4.26.1 etc.) and the 7-byte binary directory
//! record timestamp (9.1.5).

use crate::strings::{CharsetD, IsoStr};

/// A volume descriptor date/time field: `YYYYMMDDHHMMSSCC` plus a signed
/// timezone offset in 15-minute units. All-zero (including the offset)
/// means "not specified".
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
pub struct DecDateTime {
    year: IsoStr<CharsetD, 4>,
    month: IsoStr<CharsetD, 2>,
    day: IsoStr<CharsetD, 2>,
    hour: IsoStr<CharsetD, 2>,
    minute: IsoStr<CharsetD, 2>,
    second: IsoStr<CharsetD, 2>,
    hundredths: IsoStr<CharsetD, 2>,
    timezone: u8,
}

impl DecDateTime {
    pub fn unspecified() -> Self {
        Self {
            year: IsoStr::from_bytes_exact(*b"0000"),
            month: IsoStr::from_bytes_exact(*b"00"),
            day: IsoStr::from_bytes_exact(*b"00"),
            hour: IsoStr::from_bytes_exact(*b"00"),
            minute: IsoStr::from_bytes_exact(*b"00"),
            second: IsoStr::from_bytes_exact(*b"00"),
            hundredths: IsoStr::from_bytes_exact(*b"00"),
            timezone: 0,
        }
    }

    pub fn is_unspecified(&self) -> bool {
        self.year.as_bytes() == b"0000" && self.timezone == 0
    }

    #[cfg(feature = "std")]
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self::from_chrono(&now)
    }

    #[cfg(feature = "std")]
    pub fn from_chrono(dt: &chrono::DateTime<chrono::Utc>) -> Self {
        use chrono::{Datelike, Timelike};
        let digits4 = |v: u32| -> [u8; 4] {
            let s = alloc::format!("{:04}", v);
            let b = s.as_bytes();
            [b[0], b[1], b[2], b[3]]
        };
        let digits2 = |v: u32| -> [u8; 2] {
            let s = alloc::format!("{:02}", v);
            let b = s.as_bytes();
            [b[0], b[1]]
        };
        Self {
            year: IsoStr::from_bytes_exact(digits4(dt.year() as u32)),
            month: IsoStr::from_bytes_exact(digits2(dt.month())),
            day: IsoStr::from_bytes_exact(digits2(dt.day())),
            hour: IsoStr::from_bytes_exact(digits2(dt.hour())),
            minute: IsoStr::from_bytes_exact(digits2(dt.minute())),
            second: IsoStr::from_bytes_exact(digits2(dt.second())),
            hundredths: IsoStr::from_bytes_exact([b'0', b'0']),
            timezone: 0,
        }
    }
}

/// A directory record date/time field: binary year-since-1900, month, day,
/// hour, minute, second, and a 15-minute-unit timezone offset.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod, Debug, PartialEq, Eq)]
pub struct DirDateTime {
    pub years_since_1900: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub offset: i8,
}

impl DirDateTime {
    pub fn zero() -> Self {
        bytemuck::Zeroable::zeroed()
    }

    #[cfg(feature = "std")]
    pub fn now() -> Self {
        use chrono::{Datelike, Timelike};
        let now = chrono::Utc::now();
        Self {
            years_since_1900: (now.year() - 1900).max(0).min(255) as u8,
            month: now.month() as u8,
            day: now.day() as u8,
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            second: now.second() as u8,
            offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unspecified_roundtrips() {
        let d = DecDateTime::unspecified();
        assert!(d.is_unspecified());
    }

    #[test]
    fn dir_date_zero_is_zeroed() {
        let d = DirDateTime::zero();
        assert_eq!(d.years_since_1900, 0);
    }
}
