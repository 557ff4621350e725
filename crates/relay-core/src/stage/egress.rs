use std::sync::Arc;
use tracing::{debug, error};

use super::{Processor, StageContext, StageExit, StageKind, StageReport};
use crate::policy::ResponsePolicy;
use crate::queue::MessageQueue;
use crate::transport::MessageSink;

/// Writes the peer stream, one `send` in flight at a time, in upstream order.
pub(crate) struct Egress<K> {
    sink: K,
    ctx: StageContext,
}

impl<K: MessageSink> Egress<K> {
    pub(crate) fn new(sink: K, ctx: StageContext) -> Self {
        Self { sink, ctx }
    }

    /// Send one message. Returns `false` when the session must stop sending.
    ///
    /// Cancellation is checked before the send only: a send that has started
    /// is allowed to finish, so a peer never sees a partial message.
    pub(crate) async fn deliver(&mut self, message: K::Message) -> bool {
        if self.ctx.is_cancelled() {
            self.ctx.record_dropped(1);
            return false;
        }
        self.ctx.begin_send();
        match self.sink.send(message).await {
            Ok(()) => {
                let sent = self.ctx.finish_send(true);
                debug!("[{}] Sent message #{}", self.ctx.session_id, sent);
                true
            }
            Err(e) => {
                self.ctx.finish_send(false);
                error!("[{}] Error sending message: {}", self.ctx.session_id, e);
                self.ctx.fail(e.into());
                false
            }
        }
    }

    /// Send everything `queue` yields until it reports closed, optionally
    /// running `processor` on each message first.
    ///
    /// On cancellation or a send error the remaining buffered messages are
    /// left for the coordinator to discard; none of them are sent.
    pub(crate) async fn drain<P>(
        mut self,
        queue: Arc<MessageQueue<K::Message>>,
        processor: Option<Processor<P>>,
    ) -> StageReport
    where
        P: ResponsePolicy<Message = K::Message>,
    {
        let exit = loop {
            let Some(message) = queue.take_until_cancelled(&self.ctx.token).await else {
                break if self.ctx.is_cancelled() {
                    StageExit::Stopped
                } else {
                    StageExit::Completed
                };
            };

            let message = match &processor {
                Some(processor) => match processor.apply(message, &self.ctx.token).await {
                    Some(result) => result,
                    None => {
                        self.ctx.record_dropped(1);
                        break StageExit::Stopped;
                    }
                },
                None => message,
            };

            if !self.deliver(message).await {
                break StageExit::Stopped;
            }
        };

        debug!(
            "[{}] Egress exited after {} sends: {:?}",
            self.ctx.session_id,
            self.ctx.counters().sent(),
            exit
        );

        StageReport::new(StageKind::Egress, exit)
    }
}
