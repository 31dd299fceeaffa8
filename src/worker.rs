use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, warn};

use crate::context::RunContext;
use crate::error::Cancelled;
use crate::fanout::{Consumed, Subscriber};
use crate::packet::Payload;
use crate::stats::RelayStats;

const SEND_BUFFER_SIZE: usize = 1024 * 1024;

/// Outbound send primitive owned by one relay worker
pub trait DatagramSink {
    fn send_datagram(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize>;
}

impl DatagramSink for Socket {
    fn send_datagram(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.send_to(payload, &dest.into())
    }
}

impl DatagramSink for UdpSocket {
    fn send_datagram(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.send_to(payload, dest)
    }
}

/// Unbound UDP socket for relaying to `dest`; the OS picks an ephemeral source
/// port on first send.
pub fn outbound_socket(dest: SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(dest), Type::DGRAM, Some(Protocol::UDP))?;
    if let Err(e) = socket.set_send_buffer_size(SEND_BUFFER_SIZE) {
        warn!("Failed to set send buffer for {}: {}", dest, e);
    }
    Ok(socket)
}

/// Relays every slot of the ring to one destination, in lockstep with the other
/// workers of the group
pub struct RelayWorker<K, O> {
    member: usize,
    destination: SocketAddr,
    // None while the outbound socket cannot be created. The worker still takes part
    // in every cycle so its peers are not left waiting, and retries on the next send.
    sink: Option<K>,
    open_sink: O,
    subscriber: Subscriber,
    stats: Arc<RelayStats>,
}

impl<K, O> RelayWorker<K, O>
where
    K: DatagramSink,
    O: Fn(SocketAddr) -> io::Result<K>,
{
    /// Opens the outbound socket right away with `open_sink`. A failure is logged
    /// and the open is retried before each later send.
    pub fn new(
        subscriber: Subscriber,
        destination: SocketAddr,
        open_sink: O,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            member: subscriber.member(),
            destination,
            sink: open_logged(&open_sink, destination),
            open_sink,
            subscriber,
            stats,
        }
    }

    /// Relay cycles until the context is cancelled
    pub fn run(mut self, ctx: &RunContext) {
        debug!("Worker {} relaying to {}", self.member, self.destination);
        while self.relay_once(ctx).is_ok() {}
        debug!("Worker {} shutting down", self.member);
    }

    /// Take part in one cycle. The output is the number of bytes sent, or `None`
    /// if the send failed.
    pub fn relay_once(&mut self, ctx: &RunContext) -> Result<Consumed<Option<usize>>, Cancelled> {
        let Self {
            member,
            destination,
            sink,
            open_sink,
            subscriber,
            stats,
        } = self;

        let consumed = subscriber.consume(ctx, |payload| {
            if sink.is_none() {
                *sink = open_logged(&*open_sink, *destination);
            }
            relay_payload(sink.as_ref(), *destination, *member, stats, payload)
        })?;

        if consumed.advanced {
            stats.cycles.fetch_add(1, Ordering::Relaxed);
        }
        Ok(consumed)
    }
}

fn open_logged<K>(
    open_sink: &impl Fn(SocketAddr) -> io::Result<K>,
    destination: SocketAddr,
) -> Option<K> {
    match open_sink(destination) {
        Ok(sink) => Some(sink),
        Err(e) => {
            error!("Cannot create relay socket for {}: {}", destination, e);
            None
        }
    }
}

fn relay_payload<K: DatagramSink>(
    sink: Option<&K>,
    destination: SocketAddr,
    member: usize,
    stats: &RelayStats,
    payload: &Payload,
) -> Option<usize> {
    let Some(sink) = sink else {
        stats.record_send_error(member);
        warn!("No relay socket for {}, skipping payload", destination);
        return None;
    };

    match sink.send_datagram(payload.as_bytes(), destination) {
        Ok(sent) => {
            stats.record_relayed(member, sent);
            debug!("Relayed payload to {} - {} bytes", destination, sent);
            Some(sent)
        }
        Err(e) => {
            stats.record_send_error(member);
            warn!("Cannot relay payload to {}: {}", destination, e);
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fanout::fanout_channel;
    use crate::listener::tests::test_stats;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Records every datagram instead of sending it
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        pub(crate) sent: Arc<Mutex<Vec<(SocketAddr, Vec<u8>)>>>,
        pub(crate) fail: bool,
    }

    impl DatagramSink for RecordingSink {
        fn send_datagram(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
            if self.fail {
                return Err(io::ErrorKind::ConnectionRefused.into());
            }
            self.sent.lock().push((dest, payload.to_vec()));
            Ok(payload.len())
        }
    }

    fn opens(
        sink: &RecordingSink,
    ) -> impl Fn(SocketAddr) -> io::Result<RecordingSink> + Send + Sync + use<> {
        let sink = sink.clone();
        move |_| Ok(sink.clone())
    }

    fn never_opens(_: SocketAddr) -> io::Result<RecordingSink> {
        Err(io::Error::from_raw_os_error(24))
    }

    fn dest() -> SocketAddr {
        "10.1.1.1:2344".parse().unwrap()
    }

    fn publish(publisher: &mut crate::fanout::Publisher, ctx: &RunContext, bytes: &[u8]) {
        publisher
            .publish(&Payload::from_slice(bytes).unwrap(), ctx)
            .unwrap();
    }

    #[test]
    fn test_relay_once_sends_exact_bytes() {
        let ctx = RunContext::new();
        let (mut publisher, mut subscribers) = fanout_channel(2, 1);
        let stats = test_stats(1);
        let sink = RecordingSink::default();
        let mut worker =
            RelayWorker::new(subscribers.remove(0), dest(), opens(&sink), stats.clone());

        publish(&mut publisher, &ctx, b"\x00\x01payload\xff");
        let consumed = worker.relay_once(&ctx).unwrap();

        assert_eq!(consumed.output, Some(10));
        assert!(consumed.advanced);
        assert_eq!(*sink.sent.lock(), vec![(dest(), b"\x00\x01payload\xff".to_vec())]);
        let snap = stats.snapshot();
        assert_eq!((snap.relayed_packets, snap.relayed_bytes, snap.cycles), (1, 10, 1));
    }

    #[test]
    fn test_send_failure_is_skipped() {
        let ctx = RunContext::new();
        let (mut publisher, mut subscribers) = fanout_channel(2, 1);
        let channel = publisher.channel().clone();
        let stats = test_stats(1);
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let mut worker =
            RelayWorker::new(subscribers.remove(0), dest(), opens(&sink), stats.clone());

        publish(&mut publisher, &ctx, b"lost");
        publish(&mut publisher, &ctx, b"also lost");
        assert_eq!(worker.relay_once(&ctx).unwrap().output, None);
        assert_eq!(worker.relay_once(&ctx).unwrap().output, None);

        // Slots are still drained and handed back
        assert_eq!(channel.read_index(), 0);
        assert_eq!(channel.fillable(), 2);
        assert_eq!(stats.snapshot().send_errors, 2);
        assert_eq!(stats.snapshot().cycles, 2);
    }

    #[test]
    fn test_worker_without_socket_keeps_group_moving() {
        let ctx = RunContext::new();
        let (mut publisher, subscribers) = fanout_channel(2, 2);
        let stats = test_stats(2);
        let sink = RecordingSink::default();

        let mut workers = subscribers.into_iter();
        let mut healthy =
            RelayWorker::new(workers.next().unwrap(), dest(), opens(&sink), stats.clone());
        let mut broken =
            RelayWorker::new(workers.next().unwrap(), dest(), never_opens, stats.clone());

        publish(&mut publisher, &ctx, b"hello");
        let broken = {
            let ctx = ctx.clone();
            std::thread::spawn(move || broken.relay_once(&ctx).unwrap().output)
        };
        let healthy = healthy.relay_once(&ctx).unwrap().output;

        assert_eq!((healthy, broken.join().unwrap()), (Some(5), None));
        assert_eq!(sink.sent.lock().len(), 1);
        assert_eq!(stats.destinations[1].errors.load(Ordering::Relaxed), 1);
        assert_eq!(stats.snapshot().cycles, 1);
    }

    #[test]
    fn test_socket_is_reopened_after_failed_open() {
        let ctx = RunContext::new();
        let (mut publisher, mut subscribers) = fanout_channel(2, 1);
        let stats = test_stats(1);
        let sink = RecordingSink::default();
        let attempts = Arc::new(AtomicUsize::new(0));

        // Out of file descriptors for the first two opens
        let open = {
            let attempts = attempts.clone();
            let sink = sink.clone();
            move |_: SocketAddr| {
                if attempts.fetch_add(1, Ordering::Relaxed) < 2 {
                    Err(io::Error::from_raw_os_error(24))
                } else {
                    Ok(sink.clone())
                }
            }
        };
        let mut worker = RelayWorker::new(subscribers.remove(0), dest(), open, stats.clone());
        assert_eq!(attempts.load(Ordering::Relaxed), 1);

        publish(&mut publisher, &ctx, b"a");
        assert_eq!(worker.relay_once(&ctx).unwrap().output, None);
        publish(&mut publisher, &ctx, b"b");
        assert_eq!(worker.relay_once(&ctx).unwrap().output, Some(1));
        publish(&mut publisher, &ctx, b"c");
        assert_eq!(worker.relay_once(&ctx).unwrap().output, Some(1));

        // Once open, the socket is kept
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
        assert_eq!(
            *sink.sent.lock(),
            vec![(dest(), b"b".to_vec()), (dest(), b"c".to_vec())]
        );
        assert_eq!(stats.snapshot().send_errors, 1);
        assert_eq!(stats.snapshot().relayed_packets, 2);
    }

    #[test]
    fn test_outbound_socket_sends_over_loopback() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let dest = receiver.local_addr().unwrap();
        let socket = outbound_socket(dest).unwrap();

        assert_eq!(socket.send_datagram(b"ping", dest).unwrap(), 4);
        let mut buf = [0u8; 16];
        let (size, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..size], b"ping");
    }
}
