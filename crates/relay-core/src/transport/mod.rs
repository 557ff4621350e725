//! Boundary to the transport layer.
//!
//! The session core never sees sockets or frames. It consumes a
//! [`MessageSource`] (ingress side) and a [`MessageSink`] (egress side), each
//! exclusively owned by one stage for the lifetime of the session.

pub mod memory;

pub use crate::error::{TransportDirection, TransportError};
pub use memory::{duplex, MemorySink, MemorySource, PeerHandle};

/// Inbound half of a call: yields peer messages until end-of-stream.
#[async_trait::async_trait]
pub trait MessageSource: Send + 'static {
    type Message: Send + 'static;

    /// Receive the next message.
    ///
    /// `Ok(None)` is the peer's end-of-stream signal, not an error.
    async fn receive(&mut self) -> Result<Option<Self::Message>, TransportError>;
}

/// Outbound half of a call.
///
/// Not assumed safe for concurrent use: only the egress stage calls `send`,
/// and never with more than one call in flight.
#[async_trait::async_trait]
pub trait MessageSink: Send + 'static {
    type Message: Send + 'static;

    async fn send(&mut self, message: Self::Message) -> Result<(), TransportError>;
}
