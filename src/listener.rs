use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info, warn};

use crate::context::{POLL_INTERVAL, RunContext};
use crate::error::Cancelled;
use crate::fanout::Publisher;
use crate::packet::{MAX_DATAGRAM_SIZE, Payload};
use crate::stats::RelayStats;

const RECV_BUFFER_SIZE: usize = 1024 * 1024;

/// Where the listener gets datagrams from.
///
/// Implementations should return `WouldBlock` or `TimedOut` periodically when idle so
/// the listener can notice cancellation.
pub trait DatagramSource {
    /// Receive one datagram into `buf`, returning its length. Datagrams longer than
    /// `buf` are truncated.
    fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<usize>;
}

impl DatagramSource for UdpSocket {
    fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv_from(buf).map(|(size, _)| size)
    }
}

/// Bind the listening UDP socket with a large receive buffer and a receive timeout
/// of [`POLL_INTERVAL`].
pub fn bind_listener(addr: SocketAddr) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .context("Cannot create socket to receive UDP messages")?;

    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
        warn!("Failed to set large receive buffer on {}: {}", addr, e);
    }

    socket
        .bind(&addr.into())
        .with_context(|| format!("Cannot bind listener socket to {}", addr))?;

    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(POLL_INTERVAL))?;

    info!("Listening on UDP {}", socket.local_addr()?);
    Ok(socket)
}

/// Single producer of the relay: receives datagrams and publishes them into the ring
pub struct Listener<S> {
    source: S,
    publisher: Publisher,
    stats: Arc<RelayStats>,
}

impl<S: DatagramSource> Listener<S> {
    pub fn new(source: S, publisher: Publisher, stats: Arc<RelayStats>) -> Self {
        Self {
            source,
            publisher,
            stats,
        }
    }

    /// Receive until the context is cancelled
    pub fn run(mut self, ctx: &RunContext) {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

        while !ctx.is_cancelled() {
            match self.source.recv_datagram(&mut buffer) {
                Ok(size) => {
                    if self.handle_datagram(&buffer[..size], ctx).is_err() {
                        break;
                    }
                }
                Err(e) => match e.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => continue,
                    _ => {
                        self.stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                        error!("Error receiving datagram: {}", e);
                        thread::sleep(POLL_INTERVAL);
                    }
                },
            }
        }

        debug!("Listener shutting down");
    }

    /// Publish one received datagram. Empty datagrams are ignored and never take a
    /// slot. Returns the slot written, if any.
    pub fn handle_datagram(
        &mut self,
        bytes: &[u8],
        ctx: &RunContext,
    ) -> Result<Option<usize>, Cancelled> {
        if bytes.is_empty() {
            self.stats.ignored_empty.fetch_add(1, Ordering::Relaxed);
            debug!("Ignoring empty datagram");
            return Ok(None);
        }
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let payload = match Payload::from_slice(bytes) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Dropping datagram: {}", e);
                return Ok(None);
            }
        };

        let slot = self.publisher.publish(&payload, ctx)?;
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        debug!("Received payload size - {} bytes, stored in slot {}", payload.len(), slot);
        Ok(Some(slot))
    }
}
