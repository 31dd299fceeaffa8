use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use clap::Parser;

use crate::config::{DEFAULT_CAPACITY, RelayConfig};
use crate::error::ConfigError;

#[derive(Parser, Debug)]
#[command(name = "udp-fanout-relay")]
#[command(about = "Relay every UDP datagram received on a port to a set of addresses on the same port")]
#[command(version)]
pub struct Args {
    /// Port to listen on for incoming datagrams, also used as the relay port
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..=65534))]
    pub port: u16,

    /// Address to relay to (repeat for several: -i IP1 -i IP2)
    #[arg(short, long = "ip", required = true)]
    pub ips: Vec<Ipv4Addr>,

    /// Interface IP to bind the listener to
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Number of datagrams buffered between the listener and the relay workers
    #[arg(short, long, default_value_t = DEFAULT_CAPACITY, value_parser = parse_capacity)]
    pub capacity: usize,

    /// Statistics report interval in seconds (0 = off)
    #[arg(short = 'r', long, default_value = "5")]
    pub interval: u64,

    /// Pin the listener and relay threads to CPU cores
    #[arg(long, default_value = "false")]
    pub pin_cores: bool,

    /// Verbose logging (default: false)
    #[arg(short, long, default_value = "false")]
    pub verbose: bool,
}

fn parse_capacity(value: &str) -> Result<usize, String> {
    let capacity: usize = value.parse().map_err(|e| format!("{e}"))?;
    if capacity == 0 {
        return Err("must be at least 1".to_string());
    }
    Ok(capacity)
}

impl TryFrom<&Args> for RelayConfig {
    type Error = ConfigError;

    fn try_from(args: &Args) -> Result<Self, Self::Error> {
        Ok(RelayConfig::for_port(args.bind, args.port, &args.ips)?
            .with_capacity(args.capacity)?
            .with_stats_interval(Some(Duration::from_secs(args.interval)))
            .with_pin_cores(args.pin_cores))
    }
}
