//! `/requests`: the read-only captured-traffic log, paginated and
//! searchable. Nothing here mutates the store; editing a request happens
//! through a Replay tab instead.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::admin_api::state::AppState;
use crate::admin_api::types::{json_response, parse_list_requests_query, store_error_response};
use crate::store::models::RequestRecord;

#[derive(Serialize)]
struct ListRequestsResponse {
    requests: Vec<RequestRecord>,
    total: u64,
}

pub async fn handle_list(state: &AppState, query: Option<&str>) -> Response<Full<Bytes>> {
    let q = parse_list_requests_query(query);
    match state.store.list_requests(&q) {
        Ok((requests, total)) => json_response(StatusCode::OK, &ListRequestsResponse { requests, total }),
        Err(e) => store_error_response(e),
    }
}

pub async fn handle_get(state: &AppState, id: i64) -> Response<Full<Bytes>> {
    match state.store.get_request(id) {
        Ok(record) => json_response(StatusCode::OK, &record),
        Err(e) => store_error_response(e),
    }
}
