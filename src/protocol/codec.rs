use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::{Error, PACKET_SIZE};
use super::message::Packet;

/// Datagram codec for NTP headers.
///
/// Each datagram holds exactly one packet, so the decoder consumes the whole
/// buffer; bytes past the fixed header (extension fields, MAC) are dropped.
#[derive(Clone, Default)]
pub struct PacketCodec;

impl PacketCodec {
    /// Creates a new packet codec
    pub fn new() -> Self {
        PacketCodec
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let datagram = src.split_to(src.len());
        if datagram.len() < PACKET_SIZE {
            return Err(Error::malformed(format!("{}-byte datagram", datagram.len())));
        }

        Packet::parse(datagram.chunk()).map(Some)
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_to(dst);
        Ok(())
    }
}
