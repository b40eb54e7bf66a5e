//! `/fuzz`: FuzzTab CRUD plus start/stop, guarded by
//! [`crate::admin_api::state::FuzzRegistry`]'s single-running-tab policy.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;

use crate::admin_api::state::AppState;
use crate::admin_api::types::{collect_body, error_response, json_response, no_content, store_error_response};
use crate::store::models::FuzzTab;

pub async fn handle_list(state: &AppState) -> Response<Full<Bytes>> {
    match state.store.list_fuzz_tabs() {
        Ok(tabs) => json_response(StatusCode::OK, &tabs),
        Err(e) => store_error_response(e),
    }
}

pub async fn handle_get(state: &AppState, id: i64) -> Response<Full<Bytes>> {
    match state.store.get_fuzz_tab(id) {
        Ok(tab) => json_response(StatusCode::OK, &tab),
        Err(e) => store_error_response(e),
    }
}

pub async fn handle_create(state: &AppState, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let bytes = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let mut tab: FuzzTab = match serde_json::from_slice(&bytes) {
        Ok(t) => t,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid fuzz tab body: {e}")),
    };
    match state.store.insert_fuzz_tab(&tab) {
        Ok(id) => {
            tab.id = id;
            json_response(StatusCode::CREATED, &tab)
        }
        Err(e) => store_error_response(e),
    }
}

pub async fn handle_update(state: &AppState, id: i64, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let bytes = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let mut tab: FuzzTab = match serde_json::from_slice(&bytes) {
        Ok(t) => t,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid fuzz tab body: {e}")),
    };
    tab.id = id;
    match state.store.update_fuzz_tab(&tab) {
        Ok(()) => json_response(StatusCode::OK, &tab),
        Err(e) => store_error_response(e),
    }
}

pub async fn handle_delete(state: &AppState, id: i64) -> Response<Full<Bytes>> {
    match state.store.delete_fuzz_tab(id) {
        Ok(()) => no_content(),
        Err(e) => store_error_response(e),
    }
}

#[derive(Deserialize, Default)]
pub struct StartFuzzRequest {
    #[serde(default)]
    start_from: usize,
}

pub async fn handle_start(state: &AppState, tab_id: i64, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let bytes = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let start: StartFuzzRequest = if bytes.is_empty() {
        StartFuzzRequest::default()
    } else {
        match serde_json::from_slice(&bytes) {
            Ok(b) => b,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid start body: {e}")),
        }
    };

    let tab = match state.store.get_fuzz_tab(tab_id) {
        Ok(t) => t,
        Err(e) => return store_error_response(e),
    };

    let Some(stop_flag) = state.fuzz_registry.try_start(tab_id) else {
        return error_response(StatusCode::CONFLICT, "another fuzz tab is already running");
    };

    let fuzz = state.fuzz.clone();
    let bus = state.bus.clone();
    let registry = state.fuzz_registry.clone();
    tokio::spawn(async move {
        fuzz.run(&tab, &bus, start.start_from, &stop_flag).await;
        registry.finish(tab_id);
    });

    json_response(StatusCode::ACCEPTED, &serde_json::json!({ "tab_id": tab_id, "running": true }))
}

pub async fn handle_stop(state: &AppState, tab_id: i64) -> Response<Full<Bytes>> {
    let stopped = state.fuzz_registry.request_stop(tab_id);
    json_response(StatusCode::OK, &serde_json::json!({ "tab_id": tab_id, "stop_requested": stopped }))
}
