//! Core types and traits for the network clock
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod types;
pub mod serde;

pub use self::error::{Error, Result};
pub use self::types::{
    ClockConfig,
    Poll,
    ServerId,
};

/// NTP protocol version written into requests
pub const PROTOCOL_VERSION: u8 = 4;

/// Well-known time service port
pub const DEFAULT_PORT: u16 = 123;

/// Size of the NTP header without extensions
pub const PACKET_SIZE: usize = 48;

/// Samples retained per association
pub const SAMPLE_CAPACITY: usize = 8;

/// Samples required before an association may be trusted
pub const MIN_SAMPLES_FOR_TRUST: usize = 3;

/// Lowest poll exponent accepted in configuration
pub const POLL_FLOOR: i8 = -4;

/// Highest poll exponent accepted in configuration (36 h)
pub const POLL_CEILING: i8 = 17;

/// Default shortest poll exponent (2 s)
pub const DEFAULT_MIN_POLL: i8 = 1;

/// Default longest poll exponent (1024 s)
pub const DEFAULT_MAX_POLL: i8 = 10;

/// Dispersion of an association that has no usable sample (16 s)
pub const MAX_DISPERSION: f64 = 16.0;

/// Servers queried when the owner configures none
pub const DEFAULT_SERVERS: &[&str] = &[
    "time.apple.com",
    "time.nist.gov",
    "0.pool.ntp.org",
    "1.pool.ntp.org",
    "2.pool.ntp.org",
    "3.pool.ntp.org",
];
