//! NetView wire protocol — client/server transport for the RPC relay.
//!
//! Carries call envelopes and ownership messages between one authoritative
//! server and its clients over length-prefixed JSON frames.
//!
//! ## Architecture
//!
//! - **WireMessage**: JSON-framed protocol messages
//! - **Transport**: the narrow send/broadcast boundary the kernel routes through
//! - **ConnectionRegistry**: tracks live client connections and their nicknames
//! - **TcpServer / TcpClient**: authenticated TCP implementation
//! - **LoopbackHub**: in-process implementation for offline play and tests

pub mod loopback;
pub mod message;
pub mod registry;
pub mod tcp;
pub mod transport;

pub use loopback::LoopbackHub;
pub use message::{CallEnvelope, RelayMessage, TransferOutcome, WireMessage};
pub use registry::{ConnectionEntry, ConnectionRegistry};
pub use tcp::{TcpClient, TcpServer};
pub use transport::{ClientTransport, ServerTransport, Transport, TransportEvent, WireError};
