//! `/oob`: lifecycle control over the Interactsh listener client.
//! Registration/poll results never flow back through the HTTP response —
//! they arrive as `backend:registrationStatus` / `backend:newInteraction`
//! events on the bus, same as every other asynchronous surface.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::admin_api::state::AppState;
use crate::admin_api::types::{error_response, json_response, parse_json_body};

#[derive(Deserialize)]
pub struct StartRequest {
    server: String,
}

#[derive(Serialize)]
struct DomainResponse {
    domain: String,
}

pub async fn handle_start(state: &AppState, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let body: StartRequest = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    match state.oob.start(&body.server).await {
        Ok(domain) => json_response(StatusCode::OK, &DomainResponse { domain }),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e),
    }
}

pub async fn handle_regenerate(state: &AppState) -> Response<Full<Bytes>> {
    match state.oob.regenerate().await {
        Ok(domain) => json_response(StatusCode::OK, &DomainResponse { domain }),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e),
    }
}

pub async fn handle_update_host(state: &AppState, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let body: StartRequest = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    match state.oob.update_host_and_port(&body.server).await {
        Ok(domain) => json_response(StatusCode::OK, &DomainResponse { domain }),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e),
    }
}

pub async fn handle_stop(state: &AppState) -> Response<Full<Bytes>> {
    state.oob.stop();
    json_response(StatusCode::OK, &serde_json::json!({ "running": state.oob.is_running() }))
}
