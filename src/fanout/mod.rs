// Single-producer, N-consumer slot handoff used by the relay
pub mod barrier;
pub mod channel;
pub mod flow_gate;
pub mod rendezvous;
pub mod ring_buffer;
pub mod semaphore;

pub use barrier::*;
pub use channel::*;
pub use flow_gate::*;
pub use rendezvous::*;
pub use ring_buffer::*;
pub use semaphore::*;
