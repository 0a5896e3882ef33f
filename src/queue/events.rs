//! Observability events for failures inside the background engine.
//!
//! Poll failures and delivery failures cannot be returned to a caller, so
//! they are logged, counted and published on a broadcast channel that any
//! number of observers can subscribe to.

use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Why a message did not reach one consumer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("conduit full")]
    ConduitFull,

    #[error("timed out after {0}ms waiting for conduit space")]
    Timeout(u64),

    #[error("conduit closed")]
    ConduitClosed,

    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
}

impl DeliveryError {
    /// Label used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryError::ConduitFull => "conduit_full",
            DeliveryError::Timeout(_) => "timeout",
            DeliveryError::ConduitClosed => "conduit_closed",
            DeliveryError::HandlerPanicked(_) => "handler_panicked",
        }
    }
}

#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A pop on `channel` failed; the engine moved on to the next channel
    PollFailed {
        channel: String,
        error: String,
        transient: bool,
    },
    /// A message was not delivered to (or not handled by) `consumer`
    DeliveryFailed {
        consumer: String,
        channel: String,
        message_id: Uuid,
        error: DeliveryError,
    },
    /// A consumer's worker exited after its conduit was closed
    ConsumerStopped { consumer: String, processed: u64 },
    /// A removed consumer's membership marker could not be deleted from the store
    MarkerRemovalFailed { consumer: String, error: String },
}

/// Cloneable publisher side of the event channel.
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is fine.
    pub fn emit(&self, event: QueueEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers() {
        let sink = EventSink::new(4);
        sink.emit(QueueEvent::ConsumerStopped {
            consumer: "c1".to_string(),
            processed: 0,
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let sink = EventSink::new(4);
        let mut rx = sink.subscribe();

        sink.emit(QueueEvent::PollFailed {
            channel: "orders".to_string(),
            error: "boom".to_string(),
            transient: true,
        });

        match rx.recv().await.unwrap() {
            QueueEvent::PollFailed { channel, .. } => assert_eq!(channel, "orders"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_delivery_error_labels() {
        assert_eq!(DeliveryError::Timeout(5).as_str(), "timeout");
        assert_eq!(
            DeliveryError::HandlerPanicked("x".to_string()).to_string(),
            "handler panicked: x"
        );
    }
}
