//! In-memory server used by the scheduler and clock tests

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::BytesMut;
use tokio::sync::mpsc;

use crate::core::Result;
use crate::network::{Datagram, Transport};
use crate::protocol::message::secs_to_short;
use crate::protocol::{LeapIndicator, Mode, Packet};

/// Answers every request instantly by pushing a reply onto the inbound
/// channel, as if a server with the configured clock offset sat behind each
/// address.
pub(crate) struct FakeServers {
    inbound: mpsc::Sender<Datagram>,
    offsets: Mutex<HashMap<SocketAddr, f64>>,
    silent: Mutex<HashSet<SocketAddr>>,
    delays: Mutex<HashMap<SocketAddr, f64>>,
    requests: AtomicUsize,
}

impl FakeServers {
    pub(crate) fn new(inbound: mpsc::Sender<Datagram>) -> Self {
        FakeServers {
            inbound,
            offsets: Mutex::new(HashMap::new()),
            silent: Mutex::new(HashSet::new()),
            delays: Mutex::new(HashMap::new()),
            requests: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_offset(&self, addr: SocketAddr, offset: f64) {
        self.offsets.lock().unwrap().insert(addr, offset);
    }

    /// Round-trip delay of one server, 20 ms unless set
    pub(crate) fn set_delay(&self, addr: SocketAddr, delay: f64) {
        self.delays.lock().unwrap().insert(addr, delay);
    }

    pub(crate) fn set_silent(&self, addr: SocketAddr, silent: bool) {
        let mut set = self.silent.lock().unwrap();
        if silent {
            set.insert(addr);
        } else {
            set.remove(&addr);
        }
    }

    pub(crate) fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Transport for FakeServers {
    fn send_datagram(&self, payload: &[u8], target: SocketAddr) -> Result<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.silent.lock().unwrap().contains(&target) {
            return Ok(());
        }

        let request = Packet::parse(payload)?;
        let offset = self.offsets.lock().unwrap().get(&target).copied().unwrap_or(0.0);
        let delay = self.delays.lock().unwrap().get(&target).copied().unwrap_or(0.02);
        let t1 = request.transmit;
        let t2 = t1.offset_by(offset + delay / 2.0);
        let t3 = t2.offset_by(0.0001);

        let reply = Packet {
            leap: LeapIndicator::NoWarning,
            version: 4,
            mode: Mode::Server,
            stratum: 1,
            poll: request.poll,
            precision: -20,
            root_delay: 0,
            root_dispersion: secs_to_short(0.001),
            reference_id: *b"GPS\0",
            reference: t2.offset_by(-16.0),
            originate: t1,
            receive: t2,
            transmit: t3,
        };
        let mut buf = BytesMut::new();
        reply.write_to(&mut buf);

        let _ = self.inbound.try_send(Datagram {
            payload: buf.freeze(),
            source: target,
            received_at: t1.offset_by(delay + 0.0001),
        });
        Ok(())
    }
}
