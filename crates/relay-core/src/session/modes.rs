//! Single-task interaction modes.
//!
//! Collect-then-respond, fan-out and lock-step need no queue: one task owns
//! both the ingress and the egress stage and alternates between them.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::policy::ResponsePolicy;
use crate::stage::{Egress, Ingress, Received, StageExit, StageKind, StageReport};
use crate::transport::{MessageSink, MessageSource};

fn report(exit: StageExit) -> StageReport {
    StageReport::new(StageKind::Exchange, exit)
}

/// Accumulate until end-of-stream, then send exactly one summary.
pub(super) async fn collect_then_respond<S, K, P>(
    mut ingress: Ingress<S>,
    mut egress: Egress<K>,
    policy: Arc<P>,
) -> StageReport
where
    S: MessageSource<Message = P::Message>,
    K: MessageSink<Message = P::Message>,
    P: ResponsePolicy,
{
    let mut received = Vec::new();
    loop {
        match ingress.next().await {
            Received::Message(message) => received.push(message),
            Received::EndOfStream => break,
            Received::Stopped => {
                ingress.context().record_dropped(received.len() as u64);
                return report(StageExit::Stopped);
            }
        }
    }

    let summary = policy.summarize(&received);
    let exit = if egress.deliver(summary).await {
        info!(
            "[{}] Collected {} messages, summary sent",
            ingress.session_id(),
            received.len()
        );
        StageExit::Completed
    } else {
        StageExit::Stopped
    };
    report(exit)
}

/// Read one request, then send `count` paced responses.
///
/// Cancellation is only observed between sends, so the last response is
/// either sent whole or not attempted.
pub(super) async fn fan_out<S, K, P>(
    mut ingress: Ingress<S>,
    mut egress: Egress<K>,
    policy: Arc<P>,
    count: u32,
    interval: Duration,
) -> StageReport
where
    S: MessageSource<Message = P::Message>,
    K: MessageSink<Message = P::Message>,
    P: ResponsePolicy,
{
    let request = match ingress.next().await {
        Received::Message(message) => message,
        Received::EndOfStream => {
            info!(
                "[{}] Peer closed before sending a fan-out request",
                ingress.session_id()
            );
            return report(StageExit::PeerClosed);
        }
        Received::Stopped => return report(StageExit::Stopped),
    };

    let token = ingress.token().clone();
    for seq in 1..=count {
        if seq > 1 && !interval.is_zero() {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return report(StageExit::Stopped);
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        debug!(
            "[{}] Sending fan-out response #{}/{}",
            ingress.session_id(),
            seq,
            count
        );
        if !egress.deliver(policy.fan_out(&request, seq)).await {
            return report(StageExit::Stopped);
        }
    }

    report(StageExit::Completed)
}

/// Receive one, respond one, strictly in turn, until end-of-stream.
pub(super) async fn lock_step<S, K, P>(
    mut ingress: Ingress<S>,
    mut egress: Egress<K>,
    policy: Arc<P>,
) -> StageReport
where
    S: MessageSource<Message = P::Message>,
    K: MessageSink<Message = P::Message>,
    P: ResponsePolicy,
{
    loop {
        match ingress.next().await {
            Received::Message(message) => {
                let response = policy.respond(&message);
                if !egress.deliver(response).await {
                    return report(StageExit::Stopped);
                }
            }
            Received::EndOfStream => {
                return report(StageExit::PeerClosed);
            }
            Received::Stopped => return report(StageExit::Stopped),
        }
    }
}
