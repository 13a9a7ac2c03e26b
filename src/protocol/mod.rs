//! Protocol implementation module
//!
//! This module defines the NTP header, its encoding/decoding, and the
//! association lifecycle states.

pub mod codec;
pub mod message;
pub mod state;

pub use self::codec::PacketCodec;
pub use self::message::{LeapIndicator, Mode, Packet};
pub use self::state::{Activation, AssociationState};

/// Highest stratum a synchronized server may report
pub const MAX_STRATUM: u8 = 15;

/// Versions accepted in replies
pub const ACCEPTED_VERSIONS: std::ops::RangeInclusive<u8> = 1..=4;
