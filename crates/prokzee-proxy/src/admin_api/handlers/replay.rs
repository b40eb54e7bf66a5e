//! `/replay`: ReplayTab CRUD plus the send/cancel operations that
//! drive the Replay Driver. A send is a request the operator may edit
//! freely (method, headers, body, even protocol version) before it goes
//! back out; the result is persisted into the same tab's request chain
//! so the tab reads as a running history of attempts.

use std::collections::HashMap;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::admin_api::state::AppState;
use crate::admin_api::types::{collect_body, error_response, json_response, no_content, store_error_response};
use crate::events::Topic;
use crate::store::models::RequestRecord;

pub async fn handle_list(state: &AppState) -> Response<Full<Bytes>> {
    match state.store.list_replay_tabs() {
        Ok(tabs) => json_response(StatusCode::OK, &tabs),
        Err(e) => store_error_response(e),
    }
}

pub async fn handle_get(state: &AppState, id: i64) -> Response<Full<Bytes>> {
    match state.store.get_replay_tab(id) {
        Ok(tab) => json_response(StatusCode::OK, &tab),
        Err(e) => store_error_response(e),
    }
}

#[derive(Deserialize)]
pub struct CreateReplayTabRequest {
    name: String,
    /// Optional seed request to copy into the new tab as its first send.
    from_request_id: Option<i64>,
}

pub async fn handle_create(state: &AppState, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let bytes = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let body: CreateReplayTabRequest = match serde_json::from_slice(&bytes) {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid replay tab body: {e}")),
    };

    let tab_id = match state.store.insert_replay_tab(&body.name) {
        Ok(id) => id,
        Err(e) => return store_error_response(e),
    };

    if let Some(source_id) = body.from_request_id {
        let source = match state.store.get_request(source_id) {
            Ok(r) => r,
            Err(e) => return store_error_response(e),
        };
        if let Err(e) = state.store.insert_request_into_replay_tab(tab_id, &source) {
            return store_error_response(e);
        }
    }

    match state.store.get_replay_tab(tab_id) {
        Ok(tab) => json_response(StatusCode::CREATED, &tab),
        Err(e) => store_error_response(e),
    }
}

#[derive(Deserialize)]
pub struct RenameReplayTabRequest {
    name: String,
}

pub async fn handle_rename(state: &AppState, id: i64, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let body: RenameReplayTabRequest = match crate::admin_api::types::parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    match state.store.rename_replay_tab(id, &body.name) {
        Ok(()) => match state.store.get_replay_tab(id) {
            Ok(tab) => json_response(StatusCode::OK, &tab),
            Err(e) => store_error_response(e),
        },
        Err(e) => store_error_response(e),
    }
}

pub async fn handle_delete(state: &AppState, id: i64) -> Response<Full<Bytes>> {
    state.replay_registry.clear(id);
    match state.store.delete_replay_tab(id) {
        Ok(()) => no_content(),
        Err(e) => store_error_response(e),
    }
}

/// The operator-edited request to (re-)send; mirrors [`RequestRecord`]'s
/// editable fields rather than the full stored shape.
#[derive(Deserialize)]
pub struct SendRequest {
    method: String,
    url: String,
    protocol_version: String,
    headers: HashMap<String, String>,
    #[serde(default)]
    body: String,
}

#[derive(Serialize)]
struct SendResponse {
    status: u16,
    headers: HashMap<String, String>,
    body: String,
    error: Option<String>,
    cancelled: bool,
}

pub async fn handle_send(state: &AppState, tab_id: i64, req: Request<Incoming>) -> Response<Full<Bytes>> {
    if let Err(e) = state.store.get_replay_tab(tab_id) {
        return store_error_response(e);
    }

    let send_req: SendRequest = match crate::admin_api::types::parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    let cancel_rx = state.replay_registry.register(tab_id);
    let send_fut = state.replay.send(
        &send_req.protocol_version,
        &send_req.method,
        &send_req.url,
        &send_req.headers,
        send_req.body.clone().into_bytes(),
    );
    tokio::pin!(send_fut);

    let outcome = tokio::select! {
        result = &mut send_fut => Some(result),
        _ = cancel_rx => None,
    };
    state.replay_registry.clear(tab_id);

    let Some(result) = outcome else {
        let response = SendResponse { status: 0, headers: HashMap::new(), body: String::new(), error: None, cancelled: true };
        state.bus.publish(Topic::ResenderResponse, &response);
        return json_response(StatusCode::OK, &response);
    };

    let response_body = String::from_utf8_lossy(&result.body).to_string();
    let record = RequestRecord {
        id: 0,
        external_id: uuid::Uuid::new_v4().to_string(),
        url: send_req.url.clone(),
        method: send_req.method.clone(),
        domain: extract_domain(&send_req.url),
        port: extract_port(&send_req.url),
        path: extract_path(&send_req.url),
        query: extract_query(&send_req.url),
        protocol_version: send_req.protocol_version.clone(),
        request_headers: serde_json::to_string(&send_req.headers).unwrap_or_default(),
        request_body: send_req.body.clone(),
        response_headers: Some(serde_json::to_string(&result.headers).unwrap_or_default()),
        response_body: Some(response_body.clone()),
        status: Some(result.status),
        length: Some(result.body.len() as i64),
        mime_type: result.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case("content-type")).map(|(_, v)| v.clone()),
        timestamp: chrono::Utc::now().timestamp(),
    };
    // Skip persisting a record for any host carrying the admin/CA hostname
    // as a substring, so replaying against the proxy's own control
    // surfaces doesn't pollute the tab's history.
    if !record.domain.contains("prokzee") {
        let _ = state.store.insert_request_into_replay_tab(tab_id, &record);
    }

    let response = SendResponse {
        status: result.status,
        headers: result.headers,
        body: response_body,
        error: result.error,
        cancelled: false,
    };
    state.bus.publish(Topic::ResenderResponse, &response);
    json_response(StatusCode::OK, &response)
}

pub async fn handle_cancel(state: &AppState, tab_id: i64) -> Response<Full<Bytes>> {
    let cancelled = state.replay_registry.cancel(tab_id);
    json_response(StatusCode::OK, &serde_json::json!({ "cancelled": cancelled }))
}

fn extract_domain(url: &str) -> String {
    url.split("://").nth(1).and_then(|rest| rest.split(['/', ':']).next()).unwrap_or_default().to_string()
}

fn extract_port(url: &str) -> u16 {
    let is_https = url.starts_with("https://");
    url.split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .and_then(|host| host.rsplit_once(':'))
        .and_then(|(_, port)| port.parse().ok())
        .unwrap_or(if is_https { 443 } else { 80 })
}

fn extract_path(url: &str) -> String {
    let after_host = url.split("://").nth(1).unwrap_or(url);
    match after_host.find('/') {
        Some(idx) => after_host[idx..].split('?').next().unwrap_or("/").to_string(),
        None => "/".to_string(),
    }
}

fn extract_query(url: &str) -> String {
    url.split_once('?').map(|(_, q)| q.to_string()).unwrap_or_default()
}
