//! Transport abstraction for the messaging runtime (spec §4.7, §4.8):
//! the `Transport` trait, the inbound decode path, the circuit-breaker
//! guarded wrapper every transport runs behind, the built-in in-process,
//! stdout/file and pub/sub-broker transports, and the process-wide registry
//! that names them.

pub mod broker;
pub mod error;
pub mod memory;
pub mod registry;
pub mod stdout;
pub mod transport;

pub use broker::{BrokerConfig, BrokerTransport, ChannelPatternBuilder};
pub use error::TransportError;
pub use memory::InProcessTransport;
pub use registry::{TransportFactory, TransportRegistry};
pub use stdout::{Sink, StdoutTransport};
pub use transport::{handle_inbound_bytes, DispatcherSink, GuardedTransport, InboundSink, Transport};
