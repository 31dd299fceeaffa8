//! UDP fan-out relay.
//!
//! A single listener receives datagrams on one port and stores them in a bounded
//! ring. One relay worker per destination forwards every slot, and the workers move
//! through the ring in lockstep: a slot is only reused once every destination has
//! been sent its copy.

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod fanout;
pub mod listener;
pub mod packet;
pub mod relay;
pub mod stats;
pub mod worker;

pub use config::{DestinationSet, RelayConfig};
pub use context::RunContext;
pub use error::{Cancelled, ConfigError, PayloadError};
pub use packet::{MAX_DATAGRAM_SIZE, Payload};
pub use relay::Relay;
pub use stats::RelayStats;
