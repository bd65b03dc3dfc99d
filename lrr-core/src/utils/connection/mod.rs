//! Module Exports
//!
//! This file exports the modules that implement the agent link.
//!
//! # Modules
//! - `messages`: wire envelope and its binary encoding
//! - `transport`: outbound queue, send loop, receive loop and dispatch
//! - `config`: agent address lookup from the key-value store
//! - `status`: connection status reporting
//! - `telemetry`: periodic status packets
//! - `udp`: datagram socket abstraction over `embassy-net`

pub mod config;
pub mod messages;
pub mod status;
pub mod telemetry;
pub mod transport;
pub mod udp;

pub use messages::{Envelope, MessageKind, TwistCmd};
pub use status::{ConnectionStatus, StatusIndicator};
pub use transport::{TransportConfig, TransportError};
