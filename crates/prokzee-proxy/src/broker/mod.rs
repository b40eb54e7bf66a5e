//! Approval Broker: correlates a captured request with the operator's
//! eventual decision.
//!
//! Each capture is assigned a UUID and parked in a `RwLock<HashMap>`
//! alongside a `oneshot::Sender` the waiting proxy task holds the
//! receiving half of. An operator decision resolves the oneshot directly;
//! a 5-minute wait with no decision is handled by the caller wrapping the
//! receive in `tokio::time::timeout` and treating elapsed time as its own
//! outcome (504), distinct from an explicit operator drop (403) even
//! though both leave no entry behind afterward. Turning interception off
//! drains every currently pending request by auto-approving it
//! unmodified, rather than tracking each one down individually.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::store::models::{Decision, HttpRequestSnapshot, PendingRequest};

pub const APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

struct Slot {
    pending: PendingRequest,
    responder: oneshot::Sender<Decision>,
}

/// Shared map of in-flight approvals.
#[derive(Clone, Default)]
pub struct ApprovalBroker {
    inner: Arc<RwLock<HashMap<String, Slot>>>,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a captured request and return its id plus a receiver that
    /// resolves once a decision is made, the request is drained, or it
    /// times out (handled by the caller via `tokio::time::timeout`).
    pub fn capture(&self, snapshot: HttpRequestSnapshot) -> (String, oneshot::Receiver<Decision>) {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        let pending = PendingRequest {
            request_id: request_id.clone(),
            captured_at: chrono::Utc::now(),
            http_request: snapshot,
        };
        self.inner.write().insert(request_id.clone(), Slot { pending, responder: tx });
        (request_id, rx)
    }

    /// Deliver an operator decision for `request_id`. Returns `false` if
    /// the request is no longer pending (already decided, drained, or
    /// timed out).
    pub fn decide(&self, decision: Decision) -> bool {
        let slot = self.inner.write().remove(&decision.request_id);
        match slot {
            Some(slot) => slot.responder.send(decision).is_ok(),
            None => false,
        }
    }

    /// Snapshot of every currently pending request, for the `requests:pending`
    /// event-bus topic and the admin API's listing endpoint.
    pub fn list_pending(&self) -> Vec<PendingRequest> {
        self.inner.read().values().map(|s| s.pending.clone()).collect()
    }

    pub fn remove(&self, request_id: &str) {
        self.inner.write().remove(request_id);
    }

    /// Auto-approve every pending request unmodified. Called when
    /// interception is toggled off so no in-flight connection is left
    /// hanging on a decision that will never come.
    pub fn drain_all(&self) {
        let slots: Vec<Slot> = self.inner.write().drain().map(|(_, v)| v).collect();
        for slot in slots {
            let decision = Decision {
                request_id: slot.pending.request_id.clone(),
                approved: true,
                headers: slot.pending.http_request.headers.clone(),
                body: slot.pending.http_request.body.clone(),
                method: slot.pending.http_request.method.clone(),
                protocol_version: slot.pending.http_request.protocol_version.clone(),
                url: slot.pending.http_request.url.clone(),
            };
            let _ = slot.responder.send(decision);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> HttpRequestSnapshot {
        HttpRequestSnapshot {
            method: "GET".into(),
            url: "https://example.com/".into(),
            protocol_version: "HTTP/1.1".into(),
            headers: HashMap::new(),
            body: vec![],
        }
    }

    #[tokio::test]
    async fn decide_resolves_the_waiting_receiver() {
        let broker = ApprovalBroker::new();
        let (id, rx) = broker.capture(snapshot());

        let decision = Decision {
            request_id: id.clone(),
            approved: true,
            headers: HashMap::new(),
            body: b"edited".to_vec(),
            method: "GET".into(),
            protocol_version: "HTTP/1.1".into(),
            url: "https://example.com/".into(),
        };
        assert!(broker.decide(decision.clone()));

        let received = rx.await.unwrap();
        assert_eq!(received.body, b"edited");
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn deciding_twice_fails_the_second_time() {
        let broker = ApprovalBroker::new();
        let (id, _rx) = broker.capture(snapshot());
        let decision = Decision {
            request_id: id,
            approved: true,
            headers: HashMap::new(),
            body: vec![],
            method: "GET".into(),
            protocol_version: "HTTP/1.1".into(),
            url: "https://example.com/".into(),
        };
        assert!(broker.decide(decision.clone()));
        assert!(!broker.decide(decision));
    }

    #[tokio::test]
    async fn drain_all_auto_approves_every_pending_request() {
        let broker = ApprovalBroker::new();
        let (_id1, rx1) = broker.capture(snapshot());
        let (_id2, rx2) = broker.capture(snapshot());
        assert_eq!(broker.pending_count(), 2);

        broker.drain_all();

        let d1 = rx1.await.unwrap();
        let d2 = rx2.await.unwrap();
        assert!(d1.approved);
        assert!(d2.approved);
        assert_eq!(broker.pending_count(), 0);
    }
}
