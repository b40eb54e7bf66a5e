//! Response helpers and request/query DTOs for the Admin API.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::models::ListRequestsQuery;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Serialize `body` as pretty JSON under `status`.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string());
    build_response_with_headers(status, [("Content-Type", "application/json")], json)
}

pub fn build_response_with_headers(
    status: StatusCode,
    headers: impl IntoIterator<Item = (impl AsRef<str>, impl AsRef<str>)>,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(status);
    for (key, value) in headers {
        builder = builder.header(key.as_ref(), value.as_ref());
    }
    builder
        .body(Full::new(body.into()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("internal error"))))
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response<Full<Bytes>> {
    json_response(status, &ErrorResponse { error: message.into() })
}

pub fn not_found() -> Response<Full<Bytes>> {
    error_response(StatusCode::NOT_FOUND, "not found")
}

/// Map a [`StoreError`] to the status code an Admin API handler should
/// respond with: `NotFound` is a 404, everything else is a 500.
pub fn store_error_response(err: StoreError) -> Response<Full<Bytes>> {
    match err {
        StoreError::NotFound(id) => error_response(StatusCode::NOT_FOUND, format!("record {id} not found")),
        other => error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

pub fn no_content() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

pub async fn collect_body(req: Request<Incoming>) -> Result<Bytes, String> {
    use http_body_util::BodyExt;
    req.collect().await.map(|c| c.to_bytes()).map_err(|e| format!("failed to read request body: {e}"))
}

pub async fn parse_json_body<T: for<'de> Deserialize<'de>>(req: Request<Incoming>) -> Result<T, String> {
    let bytes = collect_body(req).await?;
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid JSON body: {e}"))
}

/// Query parameters accepted by `GET /requests`: `page`, `limit`, `sort`,
/// `dir`, `search`.
pub fn parse_list_requests_query(query: Option<&str>) -> ListRequestsQuery {
    let mut q = ListRequestsQuery { page: 1, limit: 50, sort_key: "id".to_string(), ..Default::default() };
    let Some(query) = query else { return q };

    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else { continue };
        let value = percent_decode(value);
        match key {
            "page" => q.page = value.parse().unwrap_or(1),
            "limit" => q.limit = value.parse().unwrap_or(50),
            "sort" => q.sort_key = value,
            "dir" if value.eq_ignore_ascii_case("desc") => q.sort_dir = crate::store::models::SortDir::Desc,
            "search" => q.search = Some(value),
            _ => {}
        }
    }
    q
}

fn percent_decode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            '+' => out.push(' '),
            '%' => {
                let hi = chars.next();
                let lo = chars.next();
                match (hi.and_then(|c| c.to_digit(16)), lo.and_then(|c| c.to_digit(16))) {
                    (Some(hi), Some(lo)) => out.push(((hi << 4) | lo) as u8 as char),
                    _ => out.push('%'),
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_requests_query_defaults() {
        let q = parse_list_requests_query(None);
        assert_eq!(q.page, 1);
        assert_eq!(q.limit, 50);
        assert_eq!(q.sort_key, "id");
    }

    #[test]
    fn parses_list_requests_query_overrides() {
        let q = parse_list_requests_query(Some("page=2&limit=10&sort=status&dir=desc&search=example.com"));
        assert_eq!(q.page, 2);
        assert_eq!(q.limit, 10);
        assert_eq!(q.sort_key, "status");
        assert_eq!(q.sort_dir, crate::store::models::SortDir::Desc);
        assert_eq!(q.search.as_deref(), Some("example.com"));
    }

    #[test]
    fn percent_decode_handles_space_and_escapes() {
        assert_eq!(percent_decode("a%20b+c"), "a b c");
    }
}
