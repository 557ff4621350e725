//! In-process duplex transport.
//!
//! Backs both directions of a call with bounded tokio channels. The session
//! side gets a [`MemorySource`] and a [`MemorySink`]; the peer side gets a
//! [`PeerHandle`] that can send, inject a receive fault, finish its stream,
//! read outbound messages, or stop reading to make the session's `send` fail.

use super::{MessageSink, MessageSource, TransportError};
use tokio::sync::mpsc;

/// Create a connected duplex with `capacity` slots in each direction.
pub fn duplex<M: Send + 'static>(
    capacity: usize,
) -> (MemorySource<M>, MemorySink<M>, PeerHandle<M>) {
    let capacity = capacity.max(1);
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

    (
        MemorySource { rx: inbound_rx },
        MemorySink { tx: outbound_tx },
        PeerHandle {
            sender: PeerSender {
                tx: Some(inbound_tx),
            },
            receiver: PeerReceiver { rx: outbound_rx },
        },
    )
}

/// Session-side inbound half.
pub struct MemorySource<M> {
    rx: mpsc::Receiver<Result<M, TransportError>>,
}

#[async_trait::async_trait]
impl<M: Send + 'static> MessageSource for MemorySource<M> {
    type Message = M;

    async fn receive(&mut self) -> Result<Option<M>, TransportError> {
        match self.rx.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

/// Session-side outbound half.
pub struct MemorySink<M> {
    tx: mpsc::Sender<M>,
}

#[async_trait::async_trait]
impl<M: Send + 'static> MessageSink for MemorySink<M> {
    type Message = M;

    async fn send(&mut self, message: M) -> Result<(), TransportError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| TransportError::send("peer stopped reading"))
    }
}

/// Peer-side writer.
pub struct PeerSender<M> {
    tx: Option<mpsc::Sender<Result<M, TransportError>>>,
}

impl<M: Send + 'static> PeerSender<M> {
    /// Send a message to the session.
    pub async fn send(&self, message: impl Into<M>) -> Result<(), TransportError> {
        self.push(Ok(message.into())).await
    }

    /// Make the session's next `receive` fail with `error`.
    pub async fn fail(&self, error: TransportError) -> Result<(), TransportError> {
        self.push(Err(error)).await
    }

    /// Signal end-of-stream. Idempotent.
    pub fn finish(&mut self) {
        self.tx.take();
    }

    async fn push(&self, item: Result<M, TransportError>) -> Result<(), TransportError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| TransportError::send("stream already finished"))?;
        tx.send(item)
            .await
            .map_err(|_| TransportError::send("session stopped receiving"))
    }
}

/// Peer-side reader.
pub struct PeerReceiver<M> {
    rx: mpsc::Receiver<M>,
}

impl<M: Send + 'static> PeerReceiver<M> {
    /// Next message sent by the session; `None` once the session side is gone.
    pub async fn recv(&mut self) -> Option<M> {
        self.rx.recv().await
    }

    /// Refuse further messages; the session's next `send` fails.
    pub fn stop_reading(&mut self) {
        self.rx.close();
    }

    /// Drain everything until the session side closes.
    pub async fn collect(mut self) -> Vec<M> {
        let mut out = Vec::new();
        while let Some(message) = self.rx.recv().await {
            out.push(message);
        }
        out
    }
}

/// Both peer halves; split it to read and write concurrently.
pub struct PeerHandle<M> {
    pub sender: PeerSender<M>,
    pub receiver: PeerReceiver<M>,
}

impl<M: Send + 'static> PeerHandle<M> {
    pub fn split(self) -> (PeerSender<M>, PeerReceiver<M>) {
        (self.sender, self.receiver)
    }

    pub async fn send(&self, message: impl Into<M>) -> Result<(), TransportError> {
        self.sender.send(message).await
    }

    pub async fn fail(&self, error: TransportError) -> Result<(), TransportError> {
        self.sender.fail(error).await
    }

    pub fn finish(&mut self) {
        self.sender.finish();
    }

    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    pub fn stop_reading(&mut self) {
        self.receiver.stop_reading();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    #[tokio::test]
    async fn test_messages_then_end_of_stream() {
        let (mut source, _sink, mut peer) = duplex::<Message>(4);
        peer.send("a").await.unwrap();
        peer.send("b").await.unwrap();
        peer.finish();

        assert_eq!(source.receive().await.unwrap(), Some(Message::new("a")));
        assert_eq!(source.receive().await.unwrap(), Some(Message::new("b")));
        assert_eq!(source.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_injected_receive_fault() {
        let (mut source, _sink, peer) = duplex::<Message>(4);
        peer.fail(TransportError::receive("connection reset"))
            .await
            .unwrap();

        let err = source.receive().await.unwrap_err();
        assert_eq!(err, TransportError::receive("connection reset"));
    }

    #[tokio::test]
    async fn test_send_fails_after_stop_reading() {
        let (_source, mut sink, mut peer) = duplex::<Message>(4);
        sink.send(Message::new("first")).await.unwrap();
        assert_eq!(peer.recv().await, Some(Message::new("first")));

        peer.stop_reading();
        let err = sink.send(Message::new("second")).await.unwrap_err();
        assert_eq!(err.direction, crate::error::TransportDirection::Send);
    }

    #[tokio::test]
    async fn test_send_after_finish_is_rejected() {
        let (_source, _sink, mut peer) = duplex::<Message>(4);
        peer.finish();
        peer.finish();
        assert!(peer.send("late").await.is_err());
    }
}
