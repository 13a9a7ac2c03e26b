//! Time representation module
//!
//! NTP carries time as a 64-bit fixed-point count since 1900-01-01. This
//! module converts between that representation and the device's wall clock
//! (`SystemTime` or chrono dates) and measures intervals between stamps.
//!
//! # Examples
//!
//! ```
//! use netclock::time::{elapsed_seconds, Timestamp};
//! use std::time::{Duration, UNIX_EPOCH};
//!
//! let t1 = Timestamp::from_system_time(UNIX_EPOCH + Duration::from_secs(1_700_000_000));
//! let t2 = t1.offset_by(0.25);
//! assert!((elapsed_seconds(t1, t2) - 0.25).abs() < 1e-9);
//! ```

mod timestamp;

pub use self::timestamp::{
    elapsed_seconds, frac_to_micros, micros_to_frac, Timestamp, UNIX_EPOCH_OFFSET,
};

/// Utility functions for clock arithmetic
pub mod util {
    use std::time::{Duration, SystemTime};

    /// Applies a signed offset in seconds to a wall-clock time
    pub fn shift(time: SystemTime, offset: f64) -> SystemTime {
        if !offset.is_finite() {
            return time;
        }
        let magnitude = Duration::from_secs_f64(offset.abs());
        if offset >= 0.0 {
            time.checked_add(magnitude).unwrap_or(time)
        } else {
            time.checked_sub(magnitude).unwrap_or(time)
        }
    }

    /// Signed seconds from `a` to `b`
    pub fn signed_diff(a: SystemTime, b: SystemTime) -> f64 {
        match b.duration_since(a) {
            Ok(d) => d.as_secs_f64(),
            Err(e) => -e.duration().as_secs_f64(),
        }
    }
}
