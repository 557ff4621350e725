use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{StageContext, StageExit, StageKind, StageReport};
use crate::cancel::CancellationToken;
use crate::queue::{MessageQueue, PutError};
use crate::transport::MessageSource;

/// Result of one cancellation-aware `receive`.
pub(crate) enum Received<M> {
    Message(M),
    EndOfStream,
    /// Cancelled, or the receive failed and the error is already recorded.
    Stopped,
}

/// Reads the peer stream.
pub(crate) struct Ingress<S> {
    source: S,
    ctx: StageContext,
}

impl<S: MessageSource> Ingress<S> {
    pub(crate) fn new(source: S, ctx: StageContext) -> Self {
        Self { source, ctx }
    }

    pub(crate) fn context(&self) -> &StageContext {
        &self.ctx
    }

    pub(crate) fn session_id(&self) -> Uuid {
        self.ctx.session_id
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.ctx.token
    }

    /// Receive one message, racing the read against cancellation.
    pub(crate) async fn next(&mut self) -> Received<S::Message> {
        if self.ctx.is_cancelled() {
            return Received::Stopped;
        }

        let result = tokio::select! {
            biased;
            _ = self.ctx.token.cancelled() => return Received::Stopped,
            result = self.source.receive() => result,
        };

        match result {
            Ok(Some(message)) => {
                let received = self.ctx.record_received();
                debug!("[{}] Received message #{}", self.ctx.session_id, received);
                Received::Message(message)
            }
            Ok(None) => {
                info!(
                    "[{}] Peer closed its stream after {} messages",
                    self.ctx.session_id,
                    self.ctx.counters().received()
                );
                Received::EndOfStream
            }
            Err(e) => {
                warn!("[{}] Error receiving message: {}", self.ctx.session_id, e);
                self.ctx.fail(e.into());
                Received::Stopped
            }
        }
    }

    /// Forward every inbound message into `queue` until end-of-stream, error
    /// or cancellation. Closes `queue` on the way out.
    pub(crate) async fn forward(mut self, queue: Arc<MessageQueue<S::Message>>) -> StageReport {
        let exit = loop {
            match self.next().await {
                Received::Message(message) => {
                    match queue.put_until_cancelled(message, &self.ctx.token).await {
                        Ok(()) => {}
                        Err(PutError::Closed(_)) | Err(PutError::Cancelled) => {
                            self.ctx.record_dropped(1);
                            break StageExit::Stopped;
                        }
                    }
                }
                Received::EndOfStream => break StageExit::PeerClosed,
                Received::Stopped => break StageExit::Stopped,
            }
        };

        queue.close();
        debug!("[{}] Ingress exited: {:?}", self.ctx.session_id, exit);

        StageReport::new(StageKind::Ingress, exit)
    }
}
