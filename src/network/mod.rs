//! Network transport module
//!
//! This module handles datagram exchange with time servers and resolution
//! of configured server names. The scheduler only sees the [`Transport`]
//! trait and the [`Datagram`] channel, so tests can substitute an in-memory
//! transport for real sockets.

mod connection;
mod resolver;

pub use self::connection::UdpTransport;
pub use self::resolver::ServerResolver;

use std::net::SocketAddr;

use bytes::Bytes;

use crate::core::Result;
use crate::time::Timestamp;

/// Largest datagram accepted from a server
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Outbound half of a transport.
///
/// Sending must not block: a datagram that cannot be handed to the network
/// right away is reported as an error and the caller counts a missed cycle.
pub trait Transport: Send + Sync + 'static {
    /// Sends one datagram to a resolved server address
    fn send_datagram(&self, payload: &[u8], target: SocketAddr) -> Result<()>;
}

/// A datagram received from the network, stamped on arrival
#[derive(Debug, Clone)]
pub struct Datagram {
    /// Raw bytes as received
    pub payload: Bytes,
    /// Sender address
    pub source: SocketAddr,
    /// Device time at arrival (T4)
    pub received_at: Timestamp,
}

impl Datagram {
    /// Wraps received bytes, stamping them with the current device time
    pub fn stamped(payload: impl Into<Bytes>, source: SocketAddr) -> Self {
        let received_at = Timestamp::now();
        Datagram {
            payload: payload.into(),
            source,
            received_at,
        }
    }
}
