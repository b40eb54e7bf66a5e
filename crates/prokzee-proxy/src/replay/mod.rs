//! Replay Driver: re-sends a previously captured request, optionally
//! edited, over the same protocol version it was originally captured
//! with.

use std::collections::HashMap;

use crate::proxy::transport;
use crate::store::models::RequestRecord;

#[derive(Debug, Clone)]
pub struct ReplayResult {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub error: Option<String>,
}

/// A one-shot HTTP/HTTPS sender that never reuses upstream TLS
/// verification (replay targets are under test, same as live traffic)
/// and honors the declared protocol version via the shared transport.
#[derive(Default)]
pub struct ReplayDriver;

impl ReplayDriver {
    pub fn new() -> Self {
        Self
    }

    /// Re-issue a request, applying any edits already merged into
    /// `headers`/`body`/`method`/`url` by the caller, and transparently
    /// decompressing a gzip response body.
    pub async fn send(
        &self,
        protocol_version: &str,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Vec<u8>,
    ) -> ReplayResult {
        match transport::send(protocol_version, method, url, headers, body).await {
            Ok(resp) => {
                let body = transport::maybe_decompress_gzip(&resp.headers, resp.body);
                ReplayResult { status: resp.status, headers: resp.headers, body, error: None }
            }
            Err(e) => ReplayResult { status: 0, headers: HashMap::new(), body: Vec::new(), error: Some(e) },
        }
    }

    /// Convenience wrapper re-sending an already-stored request verbatim.
    pub async fn replay_stored(&self, record: &RequestRecord) -> ReplayResult {
        let headers: HashMap<String, String> =
            serde_json::from_str(&record.request_headers).unwrap_or_default();
        self.send(
            &record.protocol_version,
            &record.method,
            &record.url,
            &headers,
            record.request_body.clone().into_bytes(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_result_carries_error_on_failure() {
        let result = ReplayResult {
            status: 0,
            headers: HashMap::new(),
            body: Vec::new(),
            error: Some("connection refused".into()),
        };
        assert!(result.error.is_some());
    }
}
