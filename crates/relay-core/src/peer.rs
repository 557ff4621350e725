//! Scripted peer for driving in-memory sessions.
//!
//! Plays the client side of a call: writes a fixed list of messages
//! (optionally paced) while concurrently reading every response, then ends
//! its stream. Used by the demo binary, the benchmark and the tests.

use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::TransportError;
use crate::transport::PeerHandle;
use crate::Message;

/// Everything a scripted peer observed.
#[derive(Debug, Clone, Default)]
pub struct PeerTranscript {
    /// Messages successfully handed to the session.
    pub sent: usize,
    /// Responses in arrival order.
    pub responses: Vec<Message>,
    /// Arrival time of each response, measured from the first send.
    pub latencies: Vec<Duration>,
    /// Set if the session stopped accepting messages before the script ended.
    pub send_error: Option<TransportError>,
    pub elapsed: Duration,
}

/// A peer that sends a fixed script.
#[derive(Debug, Clone)]
pub struct ScriptedPeer {
    messages: Vec<Message>,
    interval: Duration,
}

impl ScriptedPeer {
    pub fn new<I, M>(messages: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<Message>,
    {
        Self {
            messages: messages.into_iter().map(Into::into).collect(),
            interval: Duration::ZERO,
        }
    }

    /// Pause between consecutive sends.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Play the script against `peer` until the session closes its side.
    pub async fn run(self, peer: PeerHandle<Message>) -> PeerTranscript {
        let (mut sender, mut receiver) = peer.split();
        let started = Instant::now();
        let interval = self.interval;
        let messages = self.messages;

        let writer = async {
            let mut sent = 0;
            for message in messages {
                if sent > 0 && !interval.is_zero() {
                    tokio::time::sleep(interval).await;
                }
                if let Err(e) = sender.send(message).await {
                    debug!("Scripted peer stopped after {} sends: {}", sent, e);
                    return (sent, Some(e));
                }
                sent += 1;
            }
            sender.finish();
            (sent, None)
        };

        let reader = async {
            let mut responses = Vec::new();
            let mut latencies = Vec::new();
            while let Some(response) = receiver.recv().await {
                latencies.push(started.elapsed());
                responses.push(response);
            }
            (responses, latencies)
        };

        let ((sent, send_error), (responses, latencies)) = tokio::join!(writer, reader);

        PeerTranscript {
            sent,
            responses,
            latencies,
            send_error,
            elapsed: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::config::{Mode, SessionConfig};
    use crate::session::SessionCoordinator;
    use crate::transport::duplex;

    #[tokio::test]
    async fn test_scripted_lock_step() {
        let coordinator = SessionCoordinator::new(SessionConfig::new(Mode::LockStep)).unwrap();
        let (source, sink, peer) = duplex(4);
        let handle = coordinator.spawn(source, sink, &CancellationToken::new());

        let transcript = ScriptedPeer::new(["one", "two"]).run(peer).await;
        let outcome = handle.join().await.unwrap();

        assert_eq!(transcript.sent, 2);
        assert!(transcript.send_error.is_none());
        assert_eq!(
            transcript.responses,
            vec![Message::new("Sync Echo: one"), Message::new("Sync Echo: two")]
        );
        assert_eq!(transcript.latencies.len(), 2);
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_writer_stops_when_session_is_gone() {
        let (source, sink, peer) = duplex::<Message>(1);
        drop(source);
        drop(sink);

        let transcript = ScriptedPeer::new(["a", "b"]).run(peer).await;
        assert_eq!(transcript.sent, 0);
        assert!(transcript.send_error.is_some());
        assert!(transcript.responses.is_empty());
    }
}
