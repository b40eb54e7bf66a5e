//! `/match-replace` CRUD: MatchReplaceRule management, validated
//! before being written to the store and recompiled into the live
//! [`crate::matchreplace::MatchReplaceEngine`] on every mutation.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};

use crate::admin_api::state::AppState;
use crate::admin_api::types::{collect_body, error_response, json_response, no_content, store_error_response};
use crate::matchreplace::validate_match_replace_rule;
use crate::store::models::MatchReplaceRule;

pub async fn handle_list(state: &AppState) -> Response<Full<Bytes>> {
    match state.store.list_match_replace() {
        Ok(rules) => json_response(StatusCode::OK, &rules),
        Err(e) => store_error_response(e),
    }
}

pub async fn handle_create(state: &AppState, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let bytes = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let mut rule: MatchReplaceRule = match serde_json::from_slice(&bytes) {
        Ok(r) => r,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid match-replace rule body: {e}")),
    };

    if let Err(e) = validate_match_replace_rule(&rule) {
        return error_response(StatusCode::BAD_REQUEST, e);
    }

    match state.store.insert_match_replace(&rule) {
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
    let mut rule: MatchReplaceRule = match serde_json::from_slice(&bytes) {
        Ok(r) => r,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid match-replace rule body: {e}")),
    };
    rule.id = id;

    if let Err(e) = validate_match_replace_rule(&rule) {
        return error_response(StatusCode::BAD_REQUEST, e);
    }

    match state.store.update_match_replace(&rule) {
        Ok(()) => match recompile(state) {
            Ok(()) => json_response(StatusCode::OK, &rule),
            Err(e) => store_error_response(e),
        },
        Err(e) => store_error_response(e),
    }
}

pub async fn handle_delete(state: &AppState, id: i64) -> Response<Full<Bytes>> {
    match state.store.delete_match_replace(id) {
        Ok(()) => match recompile(state) {
            Ok(()) => no_content(),
            Err(e) => store_error_response(e),
        },
        Err(e) => store_error_response(e),
    }
}

fn recompile(state: &AppState) -> Result<(), crate::error::StoreError> {
    state.match_replace.update(state.store.list_match_replace()?);
    Ok(())
}
