//! Shared protocol-version-constrained outbound transport.
//! The Proxy Engine's forward step, the Replay Driver, and the
//! Fuzz Driver all send through here so "honor the operator's protocol
//! version" and "never verify the upstream cert" are each implemented
//! exactly once.
//!
//! `HTTP/1.1` empties the TLS ALPN list so negotiation cannot upgrade to
//! h2 even if the upstream offers it; any other declared version uses
//! the default negotiation (h2 is consulted, not enforced, per the open
//! question this leaves undocumented upstream).

use std::collections::HashMap;
use std::io::Read;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use super::tls::NoVerifier;

pub struct TransportResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

fn tls_config(protocol_version: &str) -> rustls::ClientConfig {
    let mut config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(std::sync::Arc::new(NoVerifier))
        .with_no_client_auth();
    if protocol_version.eq_ignore_ascii_case("HTTP/1.1") {
        config.alpn_protocols.clear();
    }
    config
}

fn build_client(protocol_version: &str) -> Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>> {
    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls_config(protocol_version))
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();
    Client::builder(TokioExecutor::new()).build(https)
}

/// Issue one request over a transport constrained to `protocol_version`.
pub async fn send(
    protocol_version: &str,
    method: &str,
    url: &str,
    headers: &HashMap<String, String>,
    body: Vec<u8>,
) -> Result<TransportResponse, String> {
    let client = build_client(protocol_version);
    let mut builder = Request::builder().method(method).uri(url);
    for (k, v) in headers {
        builder = builder.header(k, v);
    }
    let request = builder
        .body(Full::new(Bytes::from(body)))
        .map_err(|e| format!("failed to build request: {e}"))?;

    let response = client
        .request(request)
        .await
        .map_err(|e| format!("upstream request failed: {e}"))?;

    let status = response.status().as_u16();
    let mut resp_headers = HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(v) = value.to_str() {
            resp_headers.insert(name.to_string(), v.to_string());
        }
    }
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| format!("failed to read response body: {e}"))?
        .to_bytes()
        .to_vec();

    Ok(TransportResponse { status, headers: resp_headers, body })
}

/// Transparently decompress a `Content-Encoding: gzip` body for display;
/// any other (or absent) encoding passes through untouched.
pub fn maybe_decompress_gzip(headers: &HashMap<String, String>, body: Vec<u8>) -> Vec<u8> {
    let is_gzip = headers
        .iter()
        .any(|(k, v)| k.eq_ignore_ascii_case("content-encoding") && v.eq_ignore_ascii_case("gzip"));
    if !is_gzip {
        return body;
    }
    let mut decoder = flate2::read::GzDecoder::new(&body[..]);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => out,
        Err(_) => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http11_clears_alpn() {
        let config = tls_config("HTTP/1.1");
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn gzip_body_passes_through_untouched_when_not_gzip_encoded() {
        let headers = HashMap::new();
        let body = b"plain".to_vec();
        assert_eq!(maybe_decompress_gzip(&headers, body.clone()), body);
    }
}
