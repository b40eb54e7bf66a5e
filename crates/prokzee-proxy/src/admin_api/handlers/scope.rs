//! `GET /scope`, `PUT /scope`: read or replace the in/out regex
//! lists and recompile the in-memory [`crate::scope::ScopeFilter`].

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};

use crate::admin_api::state::AppState;
use crate::admin_api::types::{collect_body, error_response, json_response};
use crate::store::models::ScopeList;

pub async fn handle_get(state: &AppState) -> Response<Full<Bytes>> {
    match state.store.get_scope() {
        Ok(scope) => json_response(StatusCode::OK, &scope),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn handle_put(state: &AppState, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let bytes = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let scope: ScopeList = match serde_json::from_slice(&bytes) {
        Ok(s) => s,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid scope body: {e}")),
    };

    if let Err(e) = state.scope.update(&scope) {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }
    if let Err(e) = state.store.set_scope(&scope) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    json_response(StatusCode::OK, &scope)
}
