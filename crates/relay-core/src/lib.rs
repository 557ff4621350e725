//! Relay Core - streaming RPC session coordination.
//!
//! Drives an ordered exchange of messages over a full-duplex call, decoupling
//! "receive from peer", "process" and "send to peer" into stages that progress
//! independently while staying correct under cancellation and partial failure.
//! Transport setup, wire encoding and service registration are left to the
//! caller, which plugs in a [`MessageSource`] and a [`MessageSink`].
//!
//! # Example
//!
//! ```rust
//! use relay_core::{duplex, CancellationToken, Message, Mode, SessionConfig, SessionCoordinator};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> relay_core::Result<()> {
//!     let coordinator = SessionCoordinator::new(SessionConfig::new(Mode::LockStep))?;
//!     let (source, sink, mut peer) = duplex::<Message>(8);
//!     let session = coordinator.spawn(source, sink, &CancellationToken::new());
//!
//!     peer.send("hello").await?;
//!     assert_eq!(peer.recv().await, Some(Message::new("Sync Echo: hello")));
//!     peer.finish();
//!
//!     let outcome = session.join().await?;
//!     assert!(outcome.is_success());
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod peer;
pub mod policy;
pub mod queue;
pub mod session;
pub mod stage;
pub mod transport;

pub use cancel::{CancellationToken, CancelledError};
pub use config::{LifecycleConfig, Mode, RelayConfig, SessionConfig};
pub use error::{RelayError, Result, TransportError};
pub use lifecycle::{SessionLifecycle, ShutdownReport};
pub use message::Message;
pub use peer::{PeerTranscript, ScriptedPeer};
pub use policy::{EchoPolicy, ResponsePolicy};
pub use queue::{MessageQueue, PutError};
pub use session::{
    SessionCoordinator, SessionHandle, SessionOutcome, SessionState, SessionStats,
    TerminationReason,
};
pub use stage::{StageExit, StageKind, StageReport};
pub use transport::{duplex, MessageSink, MessageSource, PeerHandle};
