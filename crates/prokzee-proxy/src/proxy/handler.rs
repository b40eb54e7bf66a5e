//! The per-request proxy pipeline:
//!
//! ```text
//! Captured -> Scope -> Rule -> (Approval | PassThrough) -> ApplyEdits
//!          -> MatchReplace(req) -> Forward -> MatchReplace(resp) -> Store.insert
//! ```
//!
//! Out-of-scope and non-intercepted traffic takes the `PassThrough` branch
//! and skips the broker entirely; everything still goes through
//! Match-Replace and is still stored, so the request log is complete
//! regardless of whether the operator ever saw the request live.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, StatusCode};
use serde_json::json;

use crate::broker::ApprovalBroker;
use crate::ca::CaManager;
use crate::events::{EventBus, Topic};
use crate::matchreplace::MatchReplaceEngine;
use crate::rules::{MatchContext, RuleEngine};
use crate::scope::ScopeFilter;
use crate::store::models::{Decision, HttpRequestSnapshot, MatchReplaceTarget, RequestRecord};
use crate::store::Store;

use super::{errorpage, headers as hdr, multipart, transport};

/// Everything a single accepted connection's handler closure needs,
/// cloned cheaply (all `Arc`) into every request future.
#[derive(Clone)]
pub struct ProxyShared {
    pub ca: Arc<CaManager>,
    pub scope: Arc<ScopeFilter>,
    pub rules: Arc<RuleEngine>,
    pub match_replace: Arc<MatchReplaceEngine>,
    pub broker: Arc<ApprovalBroker>,
    pub store: Arc<Store>,
    pub bus: Arc<EventBus>,
    pub intercept_enabled: Arc<AtomicBool>,
    /// Whether this request arrived over a TLS-terminated (MITM'd) leg,
    /// i.e. `protocol` for rule matching is `"https"` rather than `"http"`.
    pub is_tls: bool,
    pub domain: String,
    pub port: u16,
}

/// Handle one HTTP request already stripped of its CONNECT tunneling
/// concerns: `req`'s URI is the full request target (absolute-form for
/// plain HTTP, reconstructed for MITM'd HTTPS by the caller).
pub async fn handle_request(
    shared: ProxyShared,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().to_string();
    let protocol_version = if shared.is_tls { "HTTPS/1.1" } else { "HTTP/1.1" }.to_string();
    let protocol = if shared.is_tls { "https" } else { "http" };
    let (path, query) = hdr::split_path_query(req.uri().path_and_query().map(|p| p.as_str()).unwrap_or("/"));
    let mut headers = hdr::header_map_to_hashmap(req.headers());
    let url = RequestRecord::build_url(shared.is_tls, &shared.domain, shared.port, &path, &query);

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes().to_vec(),
        Err(_) => {
            return Ok(errorpage::render(StatusCode::BAD_GATEWAY, &url, "Failed to read request body"));
        }
    };

    let ctx = MatchContext {
        domain: &shared.domain,
        protocol,
        method: &method,
        url: &url,
        path: &path,
        file_extension: &crate::rules::extract_file_extension(&path),
        headers: &headers,
    };
    let in_scope = shared.scope.is_in_scope(&shared.domain);
    let should_intercept = in_scope && shared.intercept_enabled.load(Ordering::Relaxed) && shared.rules.should_intercept(&ctx);

    let (mut final_headers, mut final_body, final_method, final_url, final_protocol_version) = if should_intercept {
        match approve(&shared, &method, &url, &protocol_version, &headers, &body).await {
            ApprovalOutcome::Approved(decision) => {
                (decision.headers, decision.body, decision.method, decision.url, decision.protocol_version)
            }
            ApprovalOutcome::Dropped => {
                let record = build_request_only_record(&shared, &url, &method, &path, &query, &protocol_version, &headers, &body);
                let _ = shared.store.insert_request(&record);
                return Ok(errorpage::render(StatusCode::FORBIDDEN, &url, "Request was dropped by the operator"));
            }
            ApprovalOutcome::TimedOut => {
                let record = build_request_only_record(&shared, &url, &method, &path, &query, &protocol_version, &headers, &body);
                let _ = shared.store.insert_request(&record);
                return Ok(errorpage::render(StatusCode::GATEWAY_TIMEOUT, &url, "Request approval timed out"));
            }
        }
    } else {
        (headers.clone(), body.clone(), method.clone(), url.clone(), protocol_version.clone())
    };

    multipart::reencode_if_multipart(&mut final_headers, &mut final_body).await;
    shared.match_replace.apply(MatchReplaceTarget::Request, &mut final_headers, &mut final_body);

    let record = build_request_only_record(&shared, &final_url, &final_method, &path, &query, &final_protocol_version, &final_headers, &final_body);
    let record_id = match shared.store.insert_request(&record) {
        Ok(id) => id,
        Err(_) => -1,
    };

    let sent = transport::send(&final_protocol_version, &final_method, &final_url, &final_headers, final_body).await;

    match sent {
        Ok(mut resp) => {
            shared.match_replace.apply(MatchReplaceTarget::Response, &mut resp.headers, &mut resp.body);
            resp.body = transport::maybe_decompress_gzip(&resp.headers, resp.body);

            if record_id >= 0 {
                let response_headers = serde_json::to_string(&resp.headers).unwrap_or_default();
                let response_body = String::from_utf8_lossy(&resp.body).to_string();
                let mime_type = hdr::mime_type_from_content_type(&resp.headers);
                let _ = shared.store.update_response(
                    record_id,
                    &response_headers,
                    &response_body,
                    resp.status,
                    resp.body.len() as i64,
                    mime_type.as_deref(),
                );
            }

            let mut builder = Response::builder().status(resp.status);
            for (k, v) in &resp.headers {
                if k.eq_ignore_ascii_case("content-length") || k.eq_ignore_ascii_case("transfer-encoding") || k.eq_ignore_ascii_case("content-encoding") {
                    continue;
                }
                builder = builder.header(k, v);
            }
            builder = builder.header("Content-Length", resp.body.len().to_string());
            Ok(builder
                .body(Full::new(Bytes::from(resp.body)))
                .unwrap_or_else(|_| errorpage::render(StatusCode::BAD_GATEWAY, &final_url, "Malformed upstream response")))
        }
        Err(err) => Ok(errorpage::render(StatusCode::BAD_GATEWAY, &final_url, &format!("Upstream request failed: {err}"))),
    }
}

/// The three ways a captured request can resolve: an
/// operator decision arrives (approved, possibly edited), the operator
/// explicitly drops it (403), or nothing arrives within the 5-minute
/// window (504) — kept distinct from an explicit drop even though both
/// carry `approved = false` on the wire, since the client response code
/// differs.
enum ApprovalOutcome {
    Approved(Decision),
    Dropped,
    TimedOut,
}

/// Publish the capture to the Event Bus and wait (with the approval timeout)
/// for the operator's decision.
async fn approve(
    shared: &ProxyShared,
    method: &str,
    url: &str,
    protocol_version: &str,
    headers: &HashMap<String, String>,
    body: &[u8],
) -> ApprovalOutcome {
    let snapshot = HttpRequestSnapshot {
        method: method.to_string(),
        url: url.to_string(),
        protocol_version: protocol_version.to_string(),
        headers: headers.clone(),
        body: body.to_vec(),
    };
    let (request_id, receiver) = shared.broker.capture(snapshot.clone());
    shared.bus.publish(
        Topic::RequestApproval,
        json!({
            "request_id": request_id,
            "details": {
                "method": snapshot.method,
                "url": snapshot.url,
                "protocol_version": snapshot.protocol_version,
                "headers": snapshot.headers,
                "body": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &snapshot.body),
            },
        }),
    );

    match tokio::time::timeout(crate::broker::APPROVAL_TIMEOUT, receiver).await {
        Ok(Ok(decision)) => {
            if decision.approved {
                ApprovalOutcome::Approved(decision)
            } else {
                ApprovalOutcome::Dropped
            }
        }
        // Sender half dropped without sending: only happens if the broker
        // itself is torn down mid-wait, which carries the same client-visible
        // meaning as an unanswered request.
        Ok(Err(_)) => ApprovalOutcome::TimedOut,
        Err(_) => {
            shared.broker.remove(&request_id);
            ApprovalOutcome::TimedOut
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_request_only_record(
    shared: &ProxyShared,
    url: &str,
    method: &str,
    path: &str,
    query: &str,
    protocol_version: &str,
    headers: &HashMap<String, String>,
    body: &[u8],
) -> RequestRecord {
    RequestRecord {
        id: 0,
        external_id: uuid::Uuid::new_v4().to_string(),
        url: url.to_string(),
        method: method.to_string(),
        domain: shared.domain.clone(),
        port: shared.port,
        path: path.to_string(),
        query: query.to_string(),
        protocol_version: protocol_version.to_string(),
        request_headers: serde_json::to_string(headers).unwrap_or_default(),
        request_body: String::from_utf8_lossy(body).to_string(),
        response_headers: None,
        response_body: None,
        status: None,
        length: None,
        mime_type: None,
        timestamp: chrono::Utc::now().timestamp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::ScopeList;

    fn shared_with(store_path: &std::path::Path) -> ProxyShared {
        let ca_dir = tempfile::tempdir().unwrap();
        ProxyShared {
            ca: Arc::new(CaManager::load_or_create(ca_dir.path()).unwrap()),
            scope: Arc::new(ScopeFilter::new(&ScopeList::default()).unwrap()),
            rules: Arc::new(RuleEngine::new(vec![]).unwrap()),
            match_replace: Arc::new(MatchReplaceEngine::new(vec![])),
            broker: Arc::new(ApprovalBroker::new()),
            store: Arc::new(Store::open(store_path).unwrap()),
            bus: Arc::new(EventBus::new()),
            intercept_enabled: Arc::new(AtomicBool::new(true)),
            is_tls: false,
            domain: "example.com".to_string(),
            port: 80,
        }
    }

    #[test]
    fn builds_request_only_record_with_store_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let shared = shared_with(&dir.path().join("db.sqlite3"));
        let mut headers = HashMap::new();
        headers.insert("X-Test".to_string(), "1".to_string());
        let record = build_request_only_record(&shared, "http://example.com/a", "GET", "/a", "", "HTTP/1.1", &headers, b"body");
        assert_eq!(record.domain, "example.com");
        assert!(record.response_headers.is_none());
        assert_eq!(record.request_body, "body");
    }

    #[tokio::test]
    async fn operator_drop_delivers_an_unapproved_decision_the_pipeline_renders_as_403() {
        let dir = tempfile::tempdir().unwrap();
        let shared = shared_with(&dir.path().join("db.sqlite3"));
        let headers = HashMap::new();

        let (request_id, rx) = shared.broker.capture(HttpRequestSnapshot {
            method: "GET".into(),
            url: "https://example.com/".into(),
            protocol_version: "HTTP/1.1".into(),
            headers: headers.clone(),
            body: vec![],
        });
        assert!(shared.broker.decide(Decision {
            request_id,
            approved: false,
            headers,
            body: vec![],
            method: "GET".into(),
            protocol_version: "HTTP/1.1".into(),
            url: "https://example.com/".into(),
        }));

        let decision = rx.await.unwrap();
        assert!(!decision.approved, "operator drop carries approved = false, mapped to ApprovalOutcome::Dropped -> 403");
        assert_eq!(shared.broker.pending_count(), 0);
    }
}
