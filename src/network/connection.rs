use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::core::{Error, Result};
use super::{Datagram, Transport, MAX_DATAGRAM_SIZE};

/// UDP transport with one socket per address family
pub struct UdpTransport {
    /// Bound sockets and their local addresses
    sockets: Vec<(SocketAddr, Arc<UdpSocket>)>,
    /// Stops the receive loops
    cancel: CancellationToken,
}

impl UdpTransport {
    /// Binds every address it can and starts a receive loop per socket.
    ///
    /// Fails only if no address could be bound. Received datagrams are
    /// stamped on arrival and forwarded on the returned channel; when the
    /// channel is full they are dropped, as the network would.
    pub async fn bind(
        bind_addrs: &[SocketAddr],
        capacity: usize,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<Datagram>)> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut sockets = Vec::new();

        for &addr in bind_addrs {
            match bind_socket(addr) {
                Ok(socket) => {
                    let local = socket.local_addr()?;
                    debug!(%local, "bound time socket");
                    let socket = Arc::new(socket);
                    tokio::spawn(receive_loop(
                        Arc::clone(&socket),
                        tx.clone(),
                        cancel.child_token(),
                    ));
                    sockets.push((local, socket));
                }
                Err(e) => warn!(%addr, error = %e, "could not bind time socket"),
            }
        }

        if sockets.is_empty() {
            return Err(Error::network("failed to bind any local address"));
        }

        Ok((UdpTransport { sockets, cancel }, rx))
    }

    /// Returns the local socket addresses
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.sockets.iter().map(|(addr, _)| *addr).collect()
    }

    fn socket_for(&self, target: SocketAddr) -> Option<&UdpSocket> {
        self.sockets
            .iter()
            .find(|(local, _)| local.is_ipv4() == target.is_ipv4())
            .map(|(_, socket)| socket.as_ref())
    }
}

impl Transport for UdpTransport {
    fn send_datagram(&self, payload: &[u8], target: SocketAddr) -> Result<()> {
        let socket = self.socket_for(target).ok_or_else(|| {
            Error::transport(format!("no local socket can reach {}", target))
        })?;

        match socket.try_send_to(payload, target) {
            Ok(sent) if sent == payload.len() => Ok(()),
            Ok(sent) => Err(Error::transport(format!(
                "short send to {}: {} of {} bytes",
                target,
                sent,
                payload.len()
            ))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                Err(Error::transport(format!("socket busy sending to {}", target)))
            }
            Err(e) => Err(Error::transport(format!("send to {} failed: {}", target, e))),
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn bind_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    tx: mpsc::Sender<Datagram>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            result = socket.recv_from(&mut buf) => match result {
                Ok((len, source)) => {
                    let datagram = Datagram::stamped(buf[..len].to_vec(), source);
                    trace!(%source, len, "datagram received");
                    match tx.try_send(datagram) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            debug!(%source, "inbound queue full, datagram dropped");
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
                // ICMP errors surface here on some platforms; they concern one
                // server only, so keep listening
                Err(e) => debug!(error = %e, "receive failed"),
            }
        }
    }
}
