use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::ConfigError;

/// Ring slots available to the listener before it has to wait for the relay workers
pub const DEFAULT_CAPACITY: usize = 50;

pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Ordered, non-empty list of relay targets, fixed for the life of the relay.
/// Its length is the consumer group size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationSet {
    addrs: Vec<SocketAddr>,
}

impl DestinationSet {
    pub fn new(addrs: Vec<SocketAddr>) -> Result<Self, ConfigError> {
        if addrs.is_empty() {
            return Err(ConfigError::NoDestinations);
        }
        Ok(Self { addrs })
    }

    /// Every address relayed to on the same `port`
    pub fn with_shared_port(ips: &[Ipv4Addr], port: u16) -> Result<Self, ConfigError> {
        Self::new(
            ips.iter()
                .map(|ip| SocketAddr::new(IpAddr::V4(*ip), port))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SocketAddr> {
        self.addrs.iter()
    }

    /// Addresses listed more than once, in first-repeat order
    pub fn duplicates(&self) -> Vec<SocketAddr> {
        let mut seen = HashSet::new();
        let mut repeated = Vec::new();
        for addr in &self.addrs {
            if !seen.insert(*addr) && !repeated.contains(addr) {
                repeated.push(*addr);
            }
        }
        repeated
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Local address the listener binds to
    pub listen_addr: SocketAddr,
    pub destinations: DestinationSet,
    // Only set through `with_capacity`, never zero
    capacity: usize,
    /// Period of the statistics report, `None` to disable it
    pub stats_interval: Option<Duration>,
    /// Pin listener and workers to CPU cores
    pub pin_cores: bool,
}

impl RelayConfig {
    pub fn new(listen_addr: SocketAddr, destinations: DestinationSet) -> Self {
        Self {
            listen_addr,
            destinations,
            capacity: DEFAULT_CAPACITY,
            stats_interval: Some(DEFAULT_STATS_INTERVAL),
            pin_cores: false,
        }
    }

    /// Listen on `bind_ip:port` and relay to each of `ips` on that same port
    pub fn for_port(bind_ip: IpAddr, port: u16, ips: &[Ipv4Addr]) -> Result<Self, ConfigError> {
        if port == 0 || port == u16::MAX {
            return Err(ConfigError::InvalidPort(port));
        }
        let destinations = DestinationSet::with_shared_port(ips, port)?;
        Ok(Self::new(SocketAddr::new(bind_ip, port), destinations))
    }

    pub fn with_capacity(mut self, capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        self.capacity = capacity;
        Ok(self)
    }

    /// Number of ring slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn with_stats_interval(mut self, interval: Option<Duration>) -> Self {
        self.stats_interval = interval.filter(|d| !d.is_zero());
        self
    }

    pub fn with_pin_cores(mut self, pin_cores: bool) -> Self {
        self.pin_cores = pin_cores;
        self
    }

    pub fn group_size(&self) -> usize {
        self.destinations.len()
    }
}
