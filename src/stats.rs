use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use crate::config::DestinationSet;

#[derive(Debug)]
pub struct DestinationStats {
    pub addr: SocketAddr,
    pub relayed_packets: AtomicU64,
    pub relayed_bytes: AtomicU64,
    pub errors: AtomicU64,
}

/// Counters shared by the listener and every relay worker
#[derive(Debug)]
pub struct RelayStats {
    pub received: AtomicU64,
    pub ignored_empty: AtomicU64,
    pub published: AtomicU64,
    pub receive_errors: AtomicU64,
    /// Fully drained slots, i.e. read cursor advances
    pub cycles: AtomicU64,
    pub relayed_packets: AtomicU64,
    pub relayed_bytes: AtomicU64,
    pub send_errors: AtomicU64,
    pub destinations: Vec<DestinationStats>,
}

impl RelayStats {
    pub fn new(destinations: &DestinationSet) -> Self {
        Self {
            received: AtomicU64::new(0),
            ignored_empty: AtomicU64::new(0),
            published: AtomicU64::new(0),
            receive_errors: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            relayed_packets: AtomicU64::new(0),
            relayed_bytes: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            destinations: destinations
                .iter()
                .map(|addr| DestinationStats {
                    addr: *addr,
                    relayed_packets: AtomicU64::new(0),
                    relayed_bytes: AtomicU64::new(0),
                    errors: AtomicU64::new(0),
                })
                .collect(),
        }
    }

    pub fn record_relayed(&self, member: usize, bytes: usize) {
        self.relayed_packets.fetch_add(1, Ordering::Relaxed);
        self.relayed_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        if let Some(dest) = self.destinations.get(member) {
            dest.relayed_packets.fetch_add(1, Ordering::Relaxed);
            dest.relayed_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        }
    }

    pub fn record_send_error(&self, member: usize) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
        if let Some(dest) = self.destinations.get(member) {
            dest.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            ignored_empty: self.ignored_empty.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            relayed_packets: self.relayed_packets.load(Ordering::Relaxed),
            relayed_bytes: self.relayed_bytes.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }

    /// Log one progress line, with rates measured against `last`
    pub fn report(&self, last: &StatsSnapshot, elapsed_secs: f64) -> StatsSnapshot {
        let current = self.snapshot();
        let (rx_pps, tx_pps) = current.rates_since(last, elapsed_secs);

        info!(
            "Received: {} ({} pps) - Relayed: {} ({} pps, {} bytes) - Cycles: {} - Empty: {} - Errors: rx {} / tx {}",
            current.received,
            rx_pps as u64,
            current.relayed_packets,
            tx_pps as u64,
            current.relayed_bytes,
            current.cycles,
            current.ignored_empty,
            current.receive_errors,
            current.send_errors
        );
        current
    }

    pub fn log_summary(&self, total_secs: f64) {
        let stats = self.snapshot();
        let avg_rate = if total_secs > 0.0 {
            stats.received as f64 / total_secs
        } else {
            0.0
        };

        info!("======= RELAY SUMMARY =======");
        info!("Total time: {:.2} seconds", total_secs);
        info!("Datagrams received: {} ({} empty ignored)", stats.received, stats.ignored_empty);
        info!("Slots published: {}, fully relayed: {}", stats.published, stats.cycles);
        info!(
            "Packets relayed: {} ({:.2} MB)",
            stats.relayed_packets,
            stats.relayed_bytes as f64 / (1024.0 * 1024.0)
        );
        info!("Errors: rx {}, tx {}", stats.receive_errors, stats.send_errors);
        info!("Average receive rate: {:.0} datagrams/second", avg_rate);
        for dest in &self.destinations {
            info!(
                "  {} - {} packets, {} bytes, {} errors",
                dest.addr,
                dest.relayed_packets.load(Ordering::Relaxed),
                dest.relayed_bytes.load(Ordering::Relaxed),
                dest.errors.load(Ordering::Relaxed)
            );
        }
        info!("=============================");
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub ignored_empty: u64,
    pub published: u64,
    pub receive_errors: u64,
    pub cycles: u64,
    pub relayed_packets: u64,
    pub relayed_bytes: u64,
    pub send_errors: u64,
}

impl StatsSnapshot {
    /// (received, relayed) packets per second since `last`
    pub fn rates_since(&self, last: &StatsSnapshot, elapsed_secs: f64) -> (f64, f64) {
        if elapsed_secs <= 0.0 {
            return (0.0, 0.0);
        }
        let received = self.received.saturating_sub(last.received) as f64;
        let relayed = self.relayed_packets.saturating_sub(last.relayed_packets) as f64;
        (received / elapsed_secs, relayed / elapsed_secs)
    }
}
