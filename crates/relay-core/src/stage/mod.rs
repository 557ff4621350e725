//! Pipeline stages: ingress reads the peer, processing transforms, egress
//! writes the peer.
//!
//! Every stage returns a [`StageReport`] to the coordinator when it exits.
//! Stage errors are never swallowed: they go into the session's termination
//! record and cancel the session token so sibling stages stop too.

mod egress;
mod ingress;
mod processing;

pub(crate) use egress::Egress;
pub(crate) use ingress::{Ingress, Received};
pub(crate) use processing::{ProcessingStage, Processor};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::session::termination::Termination;
use crate::RelayError;

/// Which stage produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Ingress,
    Processing,
    Egress,
    /// Single-task modes where one task both reads and writes.
    Exchange,
}

/// How a stage left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageExit {
    /// Finished the mode's work.
    Completed,
    /// The peer ended its stream and nothing downstream was left to do.
    PeerClosed,
    /// Stopped by cancellation or a recorded error.
    Stopped,
}

/// How one stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageReport {
    pub stage: StageKind,
    pub exit: StageExit,
}

impl StageReport {
    pub(crate) fn new(stage: StageKind, exit: StageExit) -> Self {
        Self { stage, exit }
    }
}

/// Message counts shared by every stage of one session.
///
/// Stages update these as they go, so the counts survive a stage that is
/// aborted after the drain timeout.
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    received: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
    /// Messages handed to `send` that have not come back yet.
    in_flight: AtomicU64,
}

impl SessionCounters {
    pub(crate) fn received(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }

    pub(crate) fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    /// Messages dropped by stages, including any stuck in a `send` that
    /// never returned.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst) + self.in_flight.load(Ordering::SeqCst)
    }
}

/// Per-session handles every stage needs.
#[derive(Clone)]
pub(crate) struct StageContext {
    pub(crate) session_id: Uuid,
    pub(crate) token: CancellationToken,
    termination: Arc<Termination>,
    counters: Arc<SessionCounters>,
}

impl StageContext {
    pub(crate) fn new(
        session_id: Uuid,
        token: CancellationToken,
        termination: Arc<Termination>,
        counters: Arc<SessionCounters>,
    ) -> Self {
        Self {
            session_id,
            token,
            termination,
            counters,
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Record `error` as the session's terminal cause and stop all stages.
    pub(crate) fn fail(&self, error: RelayError) {
        self.termination.fail(error, &self.token);
    }

    pub(crate) fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    /// Count one inbound message; returns the running total.
    pub(crate) fn record_received(&self) -> u64 {
        self.counters.received.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn record_dropped(&self, count: u64) {
        self.counters.dropped.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn begin_send(&self) {
        self.counters.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// Settle a send started with [`begin_send`](Self::begin_send); returns
    /// the running sent total.
    pub(crate) fn finish_send(&self, delivered: bool) -> u64 {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        if delivered {
            self.counters.sent.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
            self.counters.sent()
        }
    }
}
