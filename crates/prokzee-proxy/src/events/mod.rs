//! Event Bus: typed, topic-based pub/sub between the proxy core and any
//! external UI.
//!
//! Delivery is fire-and-forget: a topic with no subscribers simply drops
//! the event. Transport is a `tokio::sync::broadcast` channel carrying
//! pre-serialized JSON envelopes; the admin API's WebSocket endpoint
//! (`admin_api::ws`) is the one real subscriber, multiplexing every topic
//! onto a single socket per connected client. Topic names are the literal
//! wire strings so an external UI written against the original
//! protocol needs no translation layer.

use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Topics emitted by the proxy core, or accepted from the UI. Kept as an
/// enum so publishers can't typo a topic name; `as_str` is what actually
/// goes over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    /// core -> UI: a captured request is awaiting an approval decision.
    RequestApproval,
    /// UI -> core: the operator's decision for a captured request.
    ForwardRequest,
    InterceptResponse,
    ResenderResponse,
    FuzzerResult,
    FuzzerProgress,
    FuzzerFinished,
    NewTabCreated,
    NewInteraction,
    Domain,
    RegistrationStatus,
    RegistrationError,
    Logs,
    Error,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::RequestApproval => "app:requestApproval",
            Topic::ForwardRequest => "frontend:forwardRequest",
            Topic::InterceptResponse => "backend:interceptResponse",
            Topic::ResenderResponse => "backend:resenderResponse",
            Topic::FuzzerResult => "backend:fuzzerResult",
            Topic::FuzzerProgress => "backend:fuzzerProgress",
            Topic::FuzzerFinished => "backend:fuzzerFinished",
            Topic::NewTabCreated => "backend:newTabCreated",
            Topic::NewInteraction => "backend:newInteraction",
            Topic::Domain => "backend:domain",
            Topic::RegistrationStatus => "backend:registrationStatus",
            Topic::RegistrationError => "backend:registrationError",
            Topic::Logs => "backend:logs",
            Topic::Error => "backend:error",
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish `payload` under `topic`. A send with no subscribers is not
    /// an error; it's simply discarded.
    pub fn publish(&self, topic: Topic, payload: impl Serialize) {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, topic = topic.as_str(), "failed to serialize event payload");
                return;
            }
        };
        let _ = self.sender.send(Event {
            topic: topic.as_str().to_string(),
            payload,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Topic::RequestApproval, json!({"request_id": "abc"}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "app:requestApproval");
        assert_eq!(event.payload, json!({"request_id": "abc"}));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(Topic::Error, json!({"error": "boom"}));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_the_event() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(Topic::Domain, json!({}));
        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }
}
