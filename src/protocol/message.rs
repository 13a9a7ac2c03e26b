use bytes::{Buf, BufMut, BytesMut};
use serde::{Serialize, Deserialize};

use crate::core::{Error, Poll, Result, PACKET_SIZE, PROTOCOL_VERSION};
use crate::time::Timestamp;

/// Two-bit warning of an impending leap second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeapIndicator {
    /// No warning
    NoWarning,
    /// Last minute of the day has 61 seconds
    InsertSecond,
    /// Last minute of the day has 59 seconds
    DeleteSecond,
    /// Clock not synchronized
    Unsynchronized,
}

impl LeapIndicator {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => LeapIndicator::NoWarning,
            1 => LeapIndicator::InsertSecond,
            2 => LeapIndicator::DeleteSecond,
            _ => LeapIndicator::Unsynchronized,
        }
    }

    fn bits(self) -> u8 {
        match self {
            LeapIndicator::NoWarning => 0,
            LeapIndicator::InsertSecond => 1,
            LeapIndicator::DeleteSecond => 2,
            LeapIndicator::Unsynchronized => 3,
        }
    }
}

/// Association mode carried in the low three bits of the first octet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Reserved,
    SymmetricActive,
    SymmetricPassive,
    Client,
    Server,
    Broadcast,
    Control,
    Private,
}

impl Mode {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0 => Mode::Reserved,
            1 => Mode::SymmetricActive,
            2 => Mode::SymmetricPassive,
            3 => Mode::Client,
            4 => Mode::Server,
            5 => Mode::Broadcast,
            6 => Mode::Control,
            _ => Mode::Private,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Mode::Reserved => 0,
            Mode::SymmetricActive => 1,
            Mode::SymmetricPassive => 2,
            Mode::Client => 3,
            Mode::Server => 4,
            Mode::Broadcast => 5,
            Mode::Control => 6,
            Mode::Private => 7,
        }
    }
}

/// NTP header exchanged between client and server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Leap second warning
    pub leap: LeapIndicator,
    /// Protocol version
    pub version: u8,
    /// Association mode
    pub mode: Mode,
    /// Hop distance from a reference clock; 0 marks a kiss-o'-death
    pub stratum: u8,
    /// Poll exponent
    pub poll: i8,
    /// Clock precision exponent in seconds
    pub precision: i8,
    /// Round-trip delay to the reference clock, 16.16 fixed-point seconds
    pub root_delay: u32,
    /// Dispersion relative to the reference clock, 16.16 fixed-point seconds
    pub root_dispersion: u32,
    /// Reference id, or kiss code when stratum is 0
    pub reference_id: [u8; 4],
    /// Time the server clock was last set
    pub reference: Timestamp,
    /// Echo of the request's transmit time (T1)
    pub originate: Timestamp,
    /// Time the request reached the server (T2)
    pub receive: Timestamp,
    /// Time the reply left the server (T3)
    pub transmit: Timestamp,
}

impl Packet {
    /// Builds a client request stamped with `transmit`
    pub fn client_request(poll: Poll, transmit: Timestamp) -> Self {
        Packet {
            leap: LeapIndicator::NoWarning,
            version: PROTOCOL_VERSION,
            mode: Mode::Client,
            stratum: 0,
            poll: poll.exponent(),
            precision: 0,
            root_delay: 0,
            root_dispersion: 0,
            reference_id: [0; 4],
            reference: Timestamp::ZERO,
            originate: Timestamp::ZERO,
            receive: Timestamp::ZERO,
            transmit,
        }
    }

    /// Parses the fixed header; trailing extension fields are ignored
    pub fn parse(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < PACKET_SIZE {
            return Err(Error::malformed(format!(
                "{} bytes, need at least {}",
                buf.len(),
                PACKET_SIZE
            )));
        }

        let first = buf.get_u8();
        let stratum = buf.get_u8();
        let poll = buf.get_i8();
        let precision = buf.get_i8();
        let root_delay = buf.get_u32();
        let root_dispersion = buf.get_u32();
        let mut reference_id = [0u8; 4];
        buf.copy_to_slice(&mut reference_id);
        let reference = Timestamp::from_bits(buf.get_u64());
        let originate = Timestamp::from_bits(buf.get_u64());
        let receive = Timestamp::from_bits(buf.get_u64());
        let transmit = Timestamp::from_bits(buf.get_u64());

        Ok(Packet {
            leap: LeapIndicator::from_bits(first >> 6),
            version: (first >> 3) & 0b111,
            mode: Mode::from_bits(first),
            stratum,
            poll,
            precision,
            root_delay,
            root_dispersion,
            reference_id,
            reference,
            originate,
            receive,
            transmit,
        })
    }

    /// Appends the 48-byte header to `dst`
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(PACKET_SIZE);
        dst.put_u8((self.leap.bits() << 6) | ((self.version & 0b111) << 3) | self.mode.bits());
        dst.put_u8(self.stratum);
        dst.put_i8(self.poll);
        dst.put_i8(self.precision);
        dst.put_u32(self.root_delay);
        dst.put_u32(self.root_dispersion);
        dst.put_slice(&self.reference_id);
        dst.put_u64(self.reference.to_bits());
        dst.put_u64(self.originate.to_bits());
        dst.put_u64(self.receive.to_bits());
        dst.put_u64(self.transmit.to_bits());
    }

    /// Root dispersion in seconds
    pub fn root_dispersion_secs(&self) -> f64 {
        short_to_secs(self.root_dispersion)
    }

    /// Advertised clock precision in seconds
    pub fn precision_secs(&self) -> f64 {
        2f64.powi(self.precision as i32)
    }

    /// The four-letter kiss code of a stratum-0 reply
    pub fn kiss_code(&self) -> Option<String> {
        if self.stratum != 0 {
            return None;
        }
        Some(
            self.reference_id
                .iter()
                .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
                .collect(),
        )
    }
}

/// Converts NTP short format (16.16 fixed point) to seconds
pub fn short_to_secs(value: u32) -> f64 {
    value as f64 / 65536.0
}

/// Converts seconds to NTP short format, saturating at the format's range
pub fn secs_to_short(secs: f64) -> u32 {
    (secs.max(0.0) * 65536.0).round().min(u32::MAX as f64) as u32
}
