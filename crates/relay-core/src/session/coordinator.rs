use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::handle::SessionHandle;
use super::modes;
use super::termination::Termination;
use super::{SessionOutcome, SessionState, SessionStats, TerminationReason};
use crate::cancel::CancellationToken;
use crate::config::{Mode, SessionConfig};
use crate::policy::{EchoPolicy, ResponsePolicy};
use crate::queue::MessageQueue;
use crate::stage::{
    Egress, Ingress, ProcessingStage, Processor, SessionCounters, StageContext, StageExit,
    StageReport,
};
use crate::transport::{MessageSink, MessageSource};
use crate::{RelayError, Result};

/// Drives one streaming call from start to a single terminal outcome.
///
/// The coordinator holds no per-session state: each call to [`run`] or
/// [`spawn`] builds its own queues, stages and termination record, so one
/// coordinator can serve any number of concurrent sessions.
///
/// [`run`]: SessionCoordinator::run
/// [`spawn`]: SessionCoordinator::spawn
pub struct SessionCoordinator<P = EchoPolicy> {
    config: SessionConfig,
    policy: Arc<P>,
}

impl<P> Clone for SessionCoordinator<P> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            policy: self.policy.clone(),
        }
    }
}

impl SessionCoordinator<EchoPolicy> {
    /// Create a coordinator using the echo response policy.
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::with_policy(config, EchoPolicy)
    }
}

impl<P: ResponsePolicy> SessionCoordinator<P> {
    /// Create a coordinator with a custom response policy.
    pub fn with_policy(config: SessionConfig, policy: P) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            policy: Arc::new(policy),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    /// Run a session to completion on the current task.
    ///
    /// The session observes `cancel` but cancelling the session internally
    /// (on a transport fault) never cancels `cancel` itself.
    pub async fn run<S, K>(&self, source: S, sink: K, cancel: &CancellationToken) -> SessionOutcome
    where
        S: MessageSource<Message = P::Message>,
        K: MessageSink<Message = P::Message>,
    {
        let (state_tx, _state_rx) = watch::channel(SessionState::Starting);
        self.drive(Uuid::new_v4(), source, sink, cancel.child_token(), state_tx)
            .await
    }

    /// Run a session on a background task and return a handle to it.
    pub fn spawn<S, K>(&self, source: S, sink: K, cancel: &CancellationToken) -> SessionHandle
    where
        S: MessageSource<Message = P::Message>,
        K: MessageSink<Message = P::Message>,
    {
        self.spawn_with(source, sink, cancel, |_| {})
    }

    /// Like [`spawn`](Self::spawn), calling `on_finish` with the outcome
    /// before the handle resolves.
    pub(crate) fn spawn_with<S, K, F>(
        &self,
        source: S,
        sink: K,
        cancel: &CancellationToken,
        on_finish: F,
    ) -> SessionHandle
    where
        S: MessageSource<Message = P::Message>,
        K: MessageSink<Message = P::Message>,
        F: FnOnce(&SessionOutcome) + Send + 'static,
    {
        let id = Uuid::new_v4();
        let token = cancel.child_token();
        let (state_tx, state_rx) = watch::channel(SessionState::Starting);

        let coordinator = self.clone();
        let session_token = token.clone();
        let task = tokio::spawn(async move {
            let outcome = coordinator
                .drive(id, source, sink, session_token, state_tx)
                .await;
            on_finish(&outcome);
            outcome
        });

        SessionHandle::new(id, token, state_rx, task)
    }

    async fn drive<S, K>(
        &self,
        id: Uuid,
        source: S,
        sink: K,
        token: CancellationToken,
        state: watch::Sender<SessionState>,
    ) -> SessionOutcome
    where
        S: MessageSource<Message = P::Message>,
        K: MessageSink<Message = P::Message>,
    {
        let started = Instant::now();
        let mode = self.config.mode;
        match mode.queue_capacity() {
            Some(capacity) => info!(
                "[{}] Starting {} session (queue capacity {})",
                id, mode, capacity
            ),
            None => info!("[{}] Starting {} session", id, mode),
        }

        let termination = Arc::new(Termination::default());
        let counters = Arc::new(SessionCounters::default());
        let ctx = StageContext::new(id, token.clone(), termination.clone(), counters.clone());
        let mut tasks: JoinSet<StageReport> = JoinSet::new();
        let mut queues: Vec<Arc<MessageQueue<P::Message>>> = Vec::new();

        // Starting: wire stages and queues for the mode.
        let ingress = Ingress::new(source, ctx.clone());
        let egress = Egress::new(sink, ctx.clone());
        match mode {
            Mode::CollectThenRespond => {
                tasks.spawn(modes::collect_then_respond(
                    ingress,
                    egress,
                    self.policy.clone(),
                ));
            }
            Mode::FanOut { count, interval } => {
                tasks.spawn(modes::fan_out(
                    ingress,
                    egress,
                    self.policy.clone(),
                    count,
                    interval,
                ));
            }
            Mode::LockStep => {
                tasks.spawn(modes::lock_step(ingress, egress, self.policy.clone()));
            }
            Mode::DecoupledPipeline {
                queue_capacity,
                processing_delay,
                dedicated_processor,
            } => {
                let inbound = Arc::new(MessageQueue::new(queue_capacity));
                queues.push(inbound.clone());
                let processor = Processor::new(self.policy.clone(), processing_delay);

                tasks.spawn(ingress.forward(inbound.clone()));
                if dedicated_processor {
                    let outbound = Arc::new(MessageQueue::new(queue_capacity));
                    queues.push(outbound.clone());
                    tasks.spawn(
                        ProcessingStage::new(processor, ctx.clone()).run(inbound, outbound.clone()),
                    );
                    tasks.spawn(egress.drain::<P>(outbound, None));
                } else {
                    tasks.spawn(egress.drain(inbound, Some(processor)));
                }
            }
        }
        Self::transition(id, &state, SessionState::Running);

        // Running: wait for every stage to finish, or for a terminal condition.
        let mut reports = Vec::with_capacity(tasks.len());
        loop {
            // Finished stages are collected before a stop request is seen, so
            // a session that already did its work is not reported cancelled.
            tokio::select! {
                biased;
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok(report)) => {
                        debug!("[{}] {:?} stage finished: {:?}", id, report.stage, report.exit);
                        reports.push(report);
                    }
                    Some(Err(e)) => {
                        error!("[{}] Stage task failed: {}", id, e);
                        ctx.fail(RelayError::Other(format!("stage task failed: {}", e)));
                    }
                },
                _ = token.cancelled() => {
                    termination.record(TerminationReason::Cancelled, Some(RelayError::Cancelled));
                    break;
                }
            }
        }

        // Draining: unblock and stop everything still running.
        if let Some(reason) = termination.reason() {
            info!("[{}] Stopping {} session: {:?}", id, mode, reason);
        }
        Self::transition(id, &state, SessionState::Draining);
        for queue in &queues {
            queue.close();
        }
        token.cancel();

        let timeout = self.config.shutdown_timeout;
        let drain_timed_out = tokio::time::timeout(timeout, async {
            while let Some(joined) = tasks.join_next().await {
                if let Ok(report) = joined {
                    reports.push(report);
                }
            }
        })
        .await
        .is_err();
        if drain_timed_out {
            warn!(
                "[{}] {} stage(s) did not acknowledge drain within {:?}, aborting",
                id,
                tasks.len(),
                timeout
            );
            tasks.abort_all();
        }

        // Counters are shared with the stages, so they hold even for a
        // stage aborted above.
        let mut stats = SessionStats {
            received: counters.received(),
            sent: counters.sent(),
            discarded: counters.dropped(),
            ..SessionStats::default()
        };
        for queue in &queues {
            stats.discarded += queue.drain().len() as u64;
        }
        if let Some(inbound) = queues.first() {
            stats.ingress_stalls = inbound.stalls();
            stats.queue_high_water = inbound.high_water_mark() as u64;
        }

        let (reason, mut error) = match termination.take() {
            Some(recorded) => recorded,
            None => match Self::natural_reason(&reports) {
                TerminationReason::Cancelled => {
                    (TerminationReason::Cancelled, Some(RelayError::Cancelled))
                }
                reason => (reason, None),
            },
        };
        // A transport fault stays the primary error; a plain stop is
        // superseded by the timeout.
        if drain_timed_out && matches!(error, None | Some(RelayError::Cancelled)) {
            error = Some(RelayError::ShutdownTimeout(timeout));
        }
        if stats.discarded > 0 {
            warn!(
                "[{}] Discarded {} unsent message(s) on {:?} termination",
                id, stats.discarded, reason
            );
        }

        Self::transition(id, &state, SessionState::Terminated);
        let elapsed = started.elapsed();
        info!(
            "[{}] Session finished: {:?} (received {}, sent {}) in {:?}",
            id, reason, stats.received, stats.sent, elapsed
        );

        SessionOutcome {
            session_id: id,
            mode,
            reason,
            error,
            stats,
            drain_timed_out,
            elapsed,
        }
    }

    /// Reason for a session no stage or canceller marked as terminal.
    fn natural_reason(reports: &[StageReport]) -> TerminationReason {
        if reports.iter().any(|r| r.exit == StageExit::Stopped) {
            TerminationReason::Cancelled
        } else if reports.iter().any(|r| r.exit == StageExit::PeerClosed) {
            TerminationReason::PeerClosed
        } else {
            TerminationReason::Normal
        }
    }

    fn transition(id: Uuid, state: &watch::Sender<SessionState>, next: SessionState) {
        let previous = state.send_replace(next);
        debug!("[{}] {:?} -> {:?}", id, previous, next);
    }
}
