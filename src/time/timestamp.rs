use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Seconds between the NTP epoch (1900-01-01) and the UNIX epoch (1970-01-01)
pub const UNIX_EPOCH_OFFSET: u32 = 0x83aa_7e80;

/// Fractional units per second (2^32)
const FRAC_PER_SEC: f64 = 4_294_967_296.0;

/// NTP timestamp: 32 bits of seconds since 1900 and 32 bits of fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp {
    seconds: u32,
    fraction: u32,
}

impl Timestamp {
    /// The all-zero timestamp, meaning "unknown" on the wire
    pub const ZERO: Timestamp = Timestamp { seconds: 0, fraction: 0 };

    /// Creates a timestamp from its two halves
    pub const fn new(seconds: u32, fraction: u32) -> Self {
        Timestamp { seconds, fraction }
    }

    /// Creates a timestamp from its 64-bit wire value
    pub const fn from_bits(bits: u64) -> Self {
        Timestamp {
            seconds: (bits >> 32) as u32,
            fraction: bits as u32,
        }
    }

    /// Returns the 64-bit wire value
    pub const fn to_bits(self) -> u64 {
        ((self.seconds as u64) << 32) | self.fraction as u64
    }

    /// Whole seconds since the NTP epoch (modulo the era)
    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    /// Fractional seconds in units of 2^-32 s
    pub fn fraction(&self) -> u32 {
        self.fraction
    }

    /// Whether this is the zero timestamp
    pub fn is_zero(&self) -> bool {
        self.seconds == 0 && self.fraction == 0
    }

    /// Reads the device clock
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Converts wall-clock time, stamping the fraction with the reference
    /// microsecond scaling. Times before 1970 saturate to the UNIX epoch.
    pub fn from_system_time(time: SystemTime) -> Self {
        let since_unix = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        let mut secs = since_unix.as_secs();
        // nearest microsecond, carrying into the seconds
        let mut micros = (since_unix.subsec_nanos() + 500) / 1_000;
        if micros >= 1_000_000 {
            micros -= 1_000_000;
            secs += 1;
        }

        Timestamp {
            seconds: (secs as u32).wrapping_add(UNIX_EPOCH_OFFSET),
            fraction: micros_to_frac(micros),
        }
    }

    /// Converts back to wall-clock time.
    ///
    /// Seconds values with the top bit clear are taken to be in era 1
    /// (2036-02-07 onwards), which keeps 1968..2104 unambiguous.
    pub fn to_system_time(self) -> SystemTime {
        let ntp_secs = if self.seconds & 0x8000_0000 == 0 {
            self.seconds as u64 + (1u64 << 32)
        } else {
            self.seconds as u64
        };
        let nanos = ((self.fraction as u64 * 1_000_000_000) >> 32) as u32;

        match ntp_secs.checked_sub(UNIX_EPOCH_OFFSET as u64) {
            Some(unix_secs) => UNIX_EPOCH + Duration::new(unix_secs, nanos),
            None => {
                let before = Duration::new(UNIX_EPOCH_OFFSET as u64 - ntp_secs, 0);
                UNIX_EPOCH - before + Duration::new(0, nanos)
            }
        }
    }

    /// Converts wall-clock time given as a chrono date
    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        Self::from_system_time(time.into())
    }

    /// Converts to a chrono date
    pub fn to_datetime(self) -> DateTime<Utc> {
        self.to_system_time().into()
    }

    /// Replaces the low bits of the fraction (below stamping resolution)
    pub fn with_low_bits(self, bits: u32, mask: u32) -> Self {
        Timestamp {
            seconds: self.seconds,
            fraction: (self.fraction & !mask) | (bits & mask),
        }
    }

    /// Shifts the timestamp by a signed number of seconds
    pub fn offset_by(self, secs: f64) -> Self {
        let delta = (secs * FRAC_PER_SEC).round() as i64;
        Timestamp::from_bits(self.to_bits().wrapping_add(delta as u64))
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        Timestamp::from_system_time(time)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}.{:08x}", self.seconds, self.fraction)
    }
}

/// Seconds from `a` to `b`, positive when `b` is later.
///
/// The difference is taken modulo 2^64 and read as signed, so it stays
/// correct across the 32-bit seconds wrap as long as the two stamps are
/// within 68 years of each other.
pub fn elapsed_seconds(a: Timestamp, b: Timestamp) -> f64 {
    let diff = b.to_bits().wrapping_sub(a.to_bits()) as i64;
    diff as f64 / FRAC_PER_SEC
}

/// Reference conversion of an NTP fraction to microseconds.
///
/// Integer approximation `(f>>12) - 759*(((f>>10)+32768)>>16)`; it is off by
/// up to about 380 µs, so wall-clock conversion does not use it.
pub fn frac_to_micros(frac: u32) -> u32 {
    (frac >> 12) - 759 * (((frac >> 10) + 32768) >> 16)
}

/// Reference conversion of microseconds to an NTP fraction:
/// `4294*us + ((1981*us)>>11)`. Accurate to a few nanoseconds.
pub fn micros_to_frac(micros: u32) -> u32 {
    4294 * micros + ((1981 * micros) >> 11)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: f64) -> Timestamp {
        Timestamp::from_bits((secs * FRAC_PER_SEC).round() as u64)
    }

    #[test]
    fn test_reference_fraction_helpers() {
        assert_eq!(micros_to_frac(0), 0);
        assert_eq!(micros_to_frac(500_000), 2_147_483_642);
        assert_eq!(micros_to_frac(999_999), 4_294_962_990);

        assert_eq!(frac_to_micros(0), 0);
        assert_eq!(frac_to_micros(1 << 31), 500_000);
        assert_eq!(frac_to_micros(2_147_483_642), 499_999);
    }

    #[test]
    fn test_wall_clock_round_trip() {
        let samples = [
            UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789),
            UNIX_EPOCH + Duration::new(1_000_000_000, 999_999_999),
            UNIX_EPOCH + Duration::new(1_288_000_000, 507_812_500),
            SystemTime::now(),
        ];

        for time in samples {
            let back = Timestamp::from_system_time(time).to_system_time();
            let diff = back
                .duration_since(time)
                .unwrap_or_else(|e| e.duration());
            assert!(diff <= Duration::from_micros(1), "{:?} drifted by {:?}", time, diff);
        }
    }

    #[test]
    fn test_timestamp_round_trip() {
        for bits in [0xe000_0000_8000_0000u64, 0xe123_4567_89ab_cdef, 0x0000_0010_ffff_ffff] {
            let t = Timestamp::from_bits(bits);
            let back = Timestamp::from_system_time(t.to_system_time());
            assert!(elapsed_seconds(t, back).abs() <= 1e-6, "{} came back as {}", t, back);
        }
    }

    #[test]
    fn test_unix_epoch_mapping() {
        let t = Timestamp::from_system_time(UNIX_EPOCH);
        assert_eq!(t, Timestamp::new(UNIX_EPOCH_OFFSET, 0));
        assert_eq!(t.to_system_time(), UNIX_EPOCH);
    }

    #[test]
    fn test_era_wrap() {
        // 2036-02-07T06:28:16Z is where the seconds field wraps to zero
        let wrap = UNIX_EPOCH + Duration::from_secs((1u64 << 32) - UNIX_EPOCH_OFFSET as u64);
        let before = Timestamp::from_system_time(wrap - Duration::from_secs(1));
        let after = Timestamp::from_system_time(wrap + Duration::from_secs(1));

        assert_eq!(before.seconds(), u32::MAX);
        assert_eq!(after.seconds(), 1);
        assert_eq!(after.to_system_time(), wrap + Duration::from_secs(1));
        assert!((elapsed_seconds(before, after) - 2.0).abs() < 1e-9);
        assert!((elapsed_seconds(after, before) + 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_elapsed_seconds() {
        assert!((elapsed_seconds(ts(0.0), ts(1.5)) - 1.5).abs() < 1e-9);
        assert!((elapsed_seconds(ts(2.0), ts(1.6)) + 0.4).abs() < 1e-9);
        assert_eq!(elapsed_seconds(ts(3.25), ts(3.25)), 0.0);
    }

    #[test]
    fn test_offset_by_and_low_bits() {
        let t = ts(100.0);
        assert!((elapsed_seconds(t, t.offset_by(0.25)) - 0.25).abs() < 1e-9);
        assert!((elapsed_seconds(t, t.offset_by(-1.5)) + 1.5).abs() < 1e-9);

        let stamped = Timestamp::new(7, 0xffff_f000).with_low_bits(0xabc, 0xfff);
        assert_eq!(stamped, Timestamp::new(7, 0xffff_fabc));
    }

    #[test]
    fn test_datetime_conversion() {
        let date = DateTime::parse_from_rfc3339("2024-03-01T12:00:00.250Z")
            .unwrap()
            .with_timezone(&Utc);
        let t = Timestamp::from_datetime(date);
        assert_eq!(t.seconds(), 1_709_294_400u32.wrapping_add(UNIX_EPOCH_OFFSET));
        let drift = (t.to_datetime() - date).num_nanoseconds().unwrap().abs();
        assert!(drift <= 1_000, "drifted by {}ns", drift);
    }
}
