//! Response derivation for each interaction mode.
//!
//! The coordinator only moves messages around; what gets sent back is decided
//! by a [`ResponsePolicy`]. [`EchoPolicy`] is the echo service behaviour.

use crate::Message;

/// Derives outbound messages from inbound ones.
pub trait ResponsePolicy: Send + Sync + 'static {
    type Message: Send + 'static;

    /// Summary sent once after a collect-then-respond stream ends.
    fn summarize(&self, received: &[Self::Message]) -> Self::Message;

    /// The `seq`-th (1-based) response of a fan-out.
    fn fan_out(&self, request: &Self::Message, seq: u32) -> Self::Message;

    /// Lock-step response to one request.
    fn respond(&self, request: &Self::Message) -> Self::Message;

    /// Pipeline processing step.
    fn process(&self, request: &Self::Message) -> Self::Message;
}

/// Echoes payloads back with a mode-specific prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoPolicy;

impl ResponsePolicy for EchoPolicy {
    type Message = Message;

    fn summarize(&self, received: &[Message]) -> Message {
        let payloads: Vec<&str> = received.iter().map(Message::payload).collect();
        Message::new(format!(
            "Received {} messages: [{}]",
            received.len(),
            payloads.join(", ")
        ))
    }

    fn fan_out(&self, request: &Message, seq: u32) -> Message {
        Message::new(format!("Echo #{}: {}", seq, request.payload()))
    }

    fn respond(&self, request: &Message) -> Message {
        Message::new(format!("Sync Echo: {}", request.payload()))
    }

    fn process(&self, request: &Message) -> Message {
        Message::new(format!("Async Echo (processed): {}", request.payload()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_keeps_receipt_order() {
        let received = vec![Message::new("a"), Message::new("b"), Message::new("c")];
        assert_eq!(
            EchoPolicy.summarize(&received).payload(),
            "Received 3 messages: [a, b, c]"
        );
    }

    #[test]
    fn test_empty_summary() {
        assert_eq!(
            EchoPolicy.summarize(&[]).payload(),
            "Received 0 messages: []"
        );
    }

    #[test]
    fn test_echo_texts() {
        let request = Message::new("x");
        assert_eq!(EchoPolicy.fan_out(&request, 3).payload(), "Echo #3: x");
        assert_eq!(EchoPolicy.respond(&request).payload(), "Sync Echo: x");
        assert_eq!(
            EchoPolicy.process(&request).payload(),
            "Async Echo (processed): x"
        );
    }
}
