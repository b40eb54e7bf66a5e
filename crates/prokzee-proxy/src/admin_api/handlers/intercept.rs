//! `GET /intercept`, `PUT /intercept`: read or flip the process-level
//! interception toggle described in §4.7. Flipping it off drains every
//! currently pending request through [`crate::broker::ApprovalBroker::drain_all`],
//! auto-approving each one unmodified so nothing is left blocked on a
//! decision the operator has just said they won't be making.

use std::sync::atomic::Ordering;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::admin_api::state::AppState;
use crate::admin_api::types::{collect_body, error_response, json_response};

#[derive(Serialize)]
struct InterceptState {
    enabled: bool,
}

pub async fn handle_get(state: &AppState) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &InterceptState { enabled: state.intercept_enabled.load(Ordering::Relaxed) },
    )
}

#[derive(Deserialize)]
struct SetInterceptRequest {
    enabled: bool,
}

pub async fn handle_put(state: &AppState, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let bytes = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let body: SetInterceptRequest = match serde_json::from_slice(&bytes) {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid intercept body: {e}")),
    };

    let was_enabled = state.intercept_enabled.swap(body.enabled, Ordering::Relaxed);
    if was_enabled && !body.enabled {
        state.broker.drain_all();
    }
    json_response(StatusCode::OK, &InterceptState { enabled: body.enabled })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin_api::state::{FuzzRegistry, ReplayRegistry};
    use crate::broker::ApprovalBroker;
    use crate::ca::CaManager;
    use crate::events::EventBus;
    use crate::fuzz::FuzzDriver;
    use crate::matchreplace::MatchReplaceEngine;
    use crate::oob::OobManager;
    use crate::replay::ReplayDriver;
    use crate::rules::RuleEngine;
    use crate::scope::ScopeFilter;
    use crate::store::models::{HttpRequestSnapshot, ScopeList};
    use crate::store::Store;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn test_state() -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::new());
        let state = AppState {
            ca: Arc::new(CaManager::load_or_create(dir.path()).unwrap()),
            scope: Arc::new(ScopeFilter::new(&ScopeList::default()).unwrap()),
            rules: Arc::new(RuleEngine::new(vec![]).unwrap()),
            match_replace: Arc::new(MatchReplaceEngine::new(vec![])),
            broker: Arc::new(ApprovalBroker::new()),
            store: Arc::new(Store::open(&dir.path().join("store.sqlite3")).unwrap()),
            bus: bus.clone(),
            intercept_enabled: Arc::new(AtomicBool::new(true)),
            replay: Arc::new(ReplayDriver::new()),
            replay_registry: Arc::new(ReplayRegistry::default()),
            fuzz: Arc::new(FuzzDriver::new()),
            fuzz_registry: Arc::new(FuzzRegistry::default()),
            oob: Arc::new(OobManager::new(bus)),
        };
        (dir, state)
    }

    #[tokio::test]
    async fn handle_get_reports_the_current_flag() {
        let (_dir, state) = test_state();
        let resp = handle_get(&state).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    /// `handle_put`'s body is `(collect_body, swap, drain_all)`; the swap
    /// and drain are exercised directly here since building a real
    /// `Request<Incoming>` body requires a live hyper connection, which
    /// this crate's other handler tests avoid the same way.
    #[tokio::test]
    async fn turning_interception_off_drains_every_pending_request() {
        let (_dir, state) = test_state();

        let snapshot = HttpRequestSnapshot {
            method: "GET".into(),
            url: "https://example.com/".into(),
            protocol_version: "HTTP/1.1".into(),
            headers: HashMap::new(),
            body: vec![],
        };
        let (_id1, rx1) = state.broker.capture(snapshot.clone());
        let (_id2, rx2) = state.broker.capture(snapshot);
        assert_eq!(state.broker.pending_count(), 2);

        let was_enabled = state.intercept_enabled.swap(false, Ordering::Relaxed);
        assert!(was_enabled);
        state.broker.drain_all();

        assert_eq!(state.broker.pending_count(), 0);
        let d1 = rx1.await.unwrap();
        let d2 = rx2.await.unwrap();
        assert!(d1.approved);
        assert!(d2.approved);
        assert!(!state.intercept_enabled.load(Ordering::Relaxed));
    }
}
