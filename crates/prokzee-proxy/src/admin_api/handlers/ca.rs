//! `/ca`: root CA inspection and export. No mutation endpoints —
//! the CA's keypair is generated once at startup by [`crate::ca::CaManager`]
//! and reused for the life of the process.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};

use crate::admin_api::state::AppState;
use crate::admin_api::types::{build_response_with_headers, json_response};

pub async fn handle_info(state: &AppState) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &state.ca.info())
}

pub async fn handle_root_cert(state: &AppState) -> Response<Full<Bytes>> {
    build_response_with_headers(
        StatusCode::OK,
        [("Content-Type", "application/x-pem-file")],
        state.ca.root_cert_pem(),
    )
}
