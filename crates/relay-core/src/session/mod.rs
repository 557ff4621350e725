//! Session coordination.
//!
//! A session is one streaming call. The [`SessionCoordinator`] wires stages
//! and queues for the configured [`Mode`](crate::Mode), watches them run,
//! drains them on any terminal condition and reports a single
//! [`SessionOutcome`].
//!
//! # States
//!
//! ```text
//! Starting -> Running -> Draining -> Terminated
//! ```
//!
//! # Data loss on abnormal termination
//!
//! When a session ends with [`TerminationReason::Error`] or
//! [`TerminationReason::Cancelled`], messages that were buffered but not yet
//! sent are discarded, never flushed. No `send` is attempted after a transport
//! fault or a cancellation. The number of discarded messages is reported in
//! [`SessionStats::discarded`].

mod coordinator;
mod handle;
mod modes;
pub(crate) mod termination;

pub use coordinator::SessionCoordinator;
pub use handle::SessionHandle;

use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::{Mode, RelayError};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Running,
    Draining,
    Terminated,
}

/// Why a session ended. Fixed once set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The mode's work finished on its own terms (summary sent, fan-out complete).
    Normal,
    /// The peer ended its stream and all pending work was flushed.
    PeerClosed,
    /// A send or receive failed.
    Error,
    /// An external stop request.
    Cancelled,
}

impl TerminationReason {
    pub fn is_success(&self) -> bool {
        matches!(self, TerminationReason::Normal | TerminationReason::PeerClosed)
    }
}

/// Message counts for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub received: u64,
    pub sent: u64,
    /// Buffered or in-hand messages dropped without being sent.
    pub discarded: u64,
    /// Times ingress found the queue full and had to wait.
    pub ingress_stalls: u64,
    /// Most messages the inbound queue held at once.
    pub queue_high_water: u64,
}

/// The single terminal result of a session.
#[derive(Debug)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub mode: Mode,
    pub reason: TerminationReason,
    /// Underlying detail for `Error` and `Cancelled`, or `ShutdownTimeout`.
    pub error: Option<RelayError>,
    pub stats: SessionStats,
    /// A stage failed to acknowledge drain and was forcibly aborted.
    pub drain_timed_out: bool,
    pub elapsed: Duration,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        self.reason.is_success() && self.error.is_none()
    }

    /// Status code for the RPC layer; 0 on success.
    pub fn status_code(&self) -> i32 {
        match &self.error {
            Some(e) => e.status_code(),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_reasons() {
        assert!(TerminationReason::Normal.is_success());
        assert!(TerminationReason::PeerClosed.is_success());
        assert!(!TerminationReason::Error.is_success());
        assert!(!TerminationReason::Cancelled.is_success());
    }

    #[test]
    fn test_reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(TerminationReason::PeerClosed).unwrap(),
            serde_json::json!("peer_closed")
        );
    }
}
