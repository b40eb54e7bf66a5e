//! `/rules` CRUD: InterceptRule management, validated before being
//! written to the store and recompiled into the live [`crate::rules::RuleEngine`]
//! on every mutation.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};

use crate::admin_api::state::AppState;
use crate::admin_api::types::{collect_body, error_response, json_response, no_content, store_error_response};
use crate::rules::validate_rule;
use crate::store::models::InterceptRule;

pub async fn handle_list(state: &AppState) -> Response<Full<Bytes>> {
    match state.store.list_rules() {
        Ok(rules) => json_response(StatusCode::OK, &rules),
        Err(e) => store_error_response(e),
    }
}

pub async fn handle_create(state: &AppState, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let bytes = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let mut rule: InterceptRule = match serde_json::from_slice(&bytes) {
        Ok(r) => r,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid rule body: {e}")),
    };

    let existing = match state.store.list_rules() {
        Ok(r) => r,
        Err(e) => return store_error_response(e),
    };
    if let Err(e) = validate_rule(&rule, &existing) {
        return error_response(StatusCode::BAD_REQUEST, e);
    }

    match state.store.insert_rule(&rule) {
        Ok(id) => {
            rule.id = id;
            if let Err(e) = recompile(state) {
                return store_error_response(e);
            }
            json_response(StatusCode::CREATED, &rule)
        }
        Err(e) => store_error_response(e),
    }
}

pub async fn handle_update(state: &AppState, id: i64, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let bytes = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let mut rule: InterceptRule = match serde_json::from_slice(&bytes) {
        Ok(r) => r,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid rule body: {e}")),
    };
    rule.id = id;

    let existing = match state.store.list_rules() {
        Ok(r) => r,
        Err(e) => return store_error_response(e),
    };
    if let Err(e) = validate_rule(&rule, &existing) {
        return error_response(StatusCode::BAD_REQUEST, e);
    }

    match state.store.update_rule(&rule) {
        Ok(()) => match recompile(state) {
            Ok(()) => json_response(StatusCode::OK, &rule),
            Err(e) => store_error_response(e),
        },
        Err(e) => store_error_response(e),
    }
}

pub async fn handle_delete(state: &AppState, id: i64) -> Response<Full<Bytes>> {
    match state.store.delete_rule(id) {
        Ok(()) => match recompile(state) {
            Ok(()) => no_content(),
            Err(e) => store_error_response(e),
        },
        Err(e) => store_error_response(e),
    }
}

fn recompile(state: &AppState) -> Result<(), crate::error::StoreError> {
    state.rules.update(state.store.list_rules()?)
}
