use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{StageContext, StageExit, StageKind, StageReport};
use crate::cancel::CancellationToken;
use crate::policy::ResponsePolicy;
use crate::queue::{MessageQueue, PutError};

/// The pipeline processing step: an optional fixed delay, then the policy's
/// 1:1 transformation.
pub(crate) struct Processor<P> {
    policy: Arc<P>,
    delay: Duration,
}

impl<P> Clone for Processor<P> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            delay: self.delay,
        }
    }
}

impl<P: ResponsePolicy> Processor<P> {
    pub(crate) fn new(policy: Arc<P>, delay: Duration) -> Self {
        Self { policy, delay }
    }

    /// Transform one message. `None` if cancelled before or during the delay.
    pub(crate) async fn apply(
        &self,
        message: P::Message,
        token: &CancellationToken,
    ) -> Option<P::Message> {
        if token.is_cancelled() {
            return None;
        }
        if !self.delay.is_zero() {
            tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        if token.is_cancelled() {
            return None;
        }
        Some(self.policy.process(&message))
    }
}

/// Dedicated processing task sitting between two queues.
pub(crate) struct ProcessingStage<P> {
    processor: Processor<P>,
    ctx: StageContext,
}

impl<P: ResponsePolicy> ProcessingStage<P> {
    pub(crate) fn new(processor: Processor<P>, ctx: StageContext) -> Self {
        Self { processor, ctx }
    }

    /// Move messages from `input` to `output` until `input` reports closed.
    /// Closes `output` on the way out.
    pub(crate) async fn run(
        self,
        input: Arc<MessageQueue<P::Message>>,
        output: Arc<MessageQueue<P::Message>>,
    ) -> StageReport {
        let mut processed = 0;

        let exit = loop {
            let Some(message) = input.take_until_cancelled(&self.ctx.token).await else {
                break if self.ctx.is_cancelled() {
                    StageExit::Stopped
                } else {
                    StageExit::Completed
                };
            };

            let Some(result) = self.processor.apply(message, &self.ctx.token).await else {
                self.ctx.record_dropped(1);
                break StageExit::Stopped;
            };

            match output.put_until_cancelled(result, &self.ctx.token).await {
                Ok(()) => processed += 1,
                Err(PutError::Closed(_)) | Err(PutError::Cancelled) => {
                    self.ctx.record_dropped(1);
                    break StageExit::Stopped;
                }
            }
        };

        output.close();
        debug!(
            "[{}] Processing exited after {} messages: {:?}",
            self.ctx.session_id, processed, exit
        );

        StageReport::new(StageKind::Processing, exit)
    }
}
