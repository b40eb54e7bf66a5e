//! `CONNECT` tunneling: every `CONNECT` is accepted immediately
//! (scope/rule decisions are made per-request once the tunnel's plaintext
//! is visible again, not at tunnel-open time). Once the client starts
//! speaking TLS inside the tunnel, the Proxy Engine terminates it with a
//! leaf cert signed for the requested SNI and re-serves HTTP/1.1 over the
//! decrypted stream so each inner request re-enters [`super::handler`].
//!
//! A non-TLS `CONNECT` target (anything that doesn't send a TLS
//! ClientHello as its first bytes, e.g. a raw WebSocket-over-CONNECT) is
//! spliced through opaquely instead, since there is no plaintext to
//! intercept.

use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::cahost;
use super::handler::{self, ProxyShared};

/// Build the 200 response that completes the `CONNECT` handshake and, on
/// a background task, service the tunnel once hyper upgrades the
/// connection to raw bytes.
pub fn handle_connect(shared: ProxyShared, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let authority = req.uri().authority().map(|a| a.to_string()).unwrap_or_default();
    let is_websocket = is_websocket_handshake(&req);

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(err) = service_tunnel(shared, authority, is_websocket, upgraded).await {
                    tracing::debug!(error = %err, "CONNECT tunnel ended");
                }
            }
            Err(err) => tracing::debug!(error = %err, "CONNECT upgrade failed"),
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .body(Full::new(Bytes::new()))
        .expect("static response is always valid")
}

/// A `CONNECT` carrying `Connection: Upgrade` + `Upgrade: websocket`
/// is never MITM'd — it is spliced through opaquely regardless of what
/// the first byte inside the tunnel looks like.
fn is_websocket_handshake(req: &Request<Incoming>) -> bool {
    headers_request_websocket_upgrade(req.headers())
}

fn headers_request_websocket_upgrade(headers: &hyper::HeaderMap) -> bool {
    let has_token = |name: &str, token: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.split(',').any(|part| part.trim().eq_ignore_ascii_case(token)))
    };
    has_token(hyper::header::CONNECTION.as_str(), "upgrade") && has_token(hyper::header::UPGRADE.as_str(), "websocket")
}

async fn service_tunnel(shared: ProxyShared, authority: String, is_websocket: bool, upgraded: hyper::upgrade::Upgraded) -> std::io::Result<()> {
    let mut io = TokioIo::new(upgraded);
    let (host, port) = split_authority(&authority);

    let mut preface = [0u8; 1];
    let peeked = peek_first_byte(&mut io, &mut preface).await?;

    if host.eq_ignore_ascii_case("prokzee") {
        return serve_plaintext_http(shared, io, preface, peeked, host, port).await;
    }

    if !is_websocket && peeked == 1 && preface[0] == 0x16 {
        mitm_tls(shared, io, preface, host, port).await
    } else {
        splice_opaque(io, preface, peeked, &host, port).await
    }
}

fn split_authority(authority: &str) -> (String, u16) {
    match authority.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(443)),
        None => (authority.to_string(), 443),
    }
}

async fn peek_first_byte<S: tokio::io::AsyncRead + Unpin>(io: &mut S, buf: &mut [u8; 1]) -> std::io::Result<usize> {
    io.read(buf).await
}

/// Opaque bidirectional splice for non-TLS `CONNECT` targets: dial the
/// real destination and copy bytes both ways, replaying the byte already
/// consumed while peeking.
async fn splice_opaque<S>(mut client_io: S, preface: [u8; 1], preface_len: usize, host: &str, port: u16) -> std::io::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut upstream = TcpStream::connect((host, port)).await?;
    if preface_len == 1 {
        upstream.write_all(&preface).await?;
    }
    tokio::io::copy_bidirectional(&mut client_io, &mut upstream).await?;
    Ok(())
}

/// Terminate TLS for `host` using a leaf cert signed by the CA, then
/// re-serve HTTP/1.1 over the decrypted stream so every inner request
/// re-enters the pipeline as a normal intercepted request.
async fn mitm_tls<S>(shared: ProxyShared, client_io: S, preface: [u8; 1], host: String, port: u16) -> std::io::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let config = super::tls::mitm_server_config(shared.ca.clone());
    let acceptor = tokio_rustls::TlsAcceptor::from(config);

    let prefixed = PrefixedIo::new(preface, client_io);
    let tls_stream = acceptor
        .accept(prefixed)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    let io = TokioIo::new(tls_stream);
    let tls_shared = ProxyShared {
        is_tls: true,
        domain: host,
        port,
        ..shared
    };

    let service = service_fn(move |req: Request<Incoming>| {
        let shared = tls_shared.clone();
        async move { handler::handle_request(shared, req).await }
    });

    hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

async fn serve_plaintext_http<S>(
    shared: ProxyShared,
    client_io: S,
    preface: [u8; 1],
    preface_len: usize,
    _host: String,
    _port: u16,
) -> std::io::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(PrefixedIo::new_with_len(preface, preface_len, client_io));
    let ca = shared.ca.clone();
    let service = service_fn(move |req: Request<Incoming>| {
        let ca = ca.clone();
        async move { Ok::<_, hyper::Error>(cahost::serve(&ca, &req)) }
    });

    hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

/// Wraps a stream whose first byte was already consumed by a peek,
/// replaying it before any further reads reach the inner stream.
struct PrefixedIo<S> {
    prefix: Option<u8>,
    inner: S,
}

impl<S> PrefixedIo<S> {
    fn new(preface: [u8; 1], inner: S) -> Self {
        Self::new_with_len(preface, 1, inner)
    }

    fn new_with_len(preface: [u8; 1], len: usize, inner: S) -> Self {
        Self {
            prefix: if len == 1 { Some(preface[0]) } else { None },
            inner,
        }
    }
}

impl<S: tokio::io::AsyncRead + Unpin> tokio::io::AsyncRead for PrefixedIo<S> {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        if let Some(byte) = self.prefix.take() {
            buf.put_slice(&[byte]);
            return std::task::Poll::Ready(Ok(()));
        }
        std::pin::Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: tokio::io::AsyncWrite + Unpin> tokio::io::AsyncWrite for PrefixedIo<S> {
    fn poll_write(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>, buf: &[u8]) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_authority_into_host_and_port() {
        assert_eq!(split_authority("example.com:443"), ("example.com".to_string(), 443));
        assert_eq!(split_authority("example.com"), ("example.com".to_string(), 443));
    }

    #[test]
    fn recognizes_a_websocket_upgrade_connect() {
        let mut headers = hyper::HeaderMap::new();
        headers.insert(hyper::header::CONNECTION, "Upgrade".parse().unwrap());
        headers.insert(hyper::header::UPGRADE, "websocket".parse().unwrap());
        assert!(headers_request_websocket_upgrade(&headers));
    }

    #[test]
    fn a_plain_connect_is_not_a_websocket_upgrade() {
        let headers = hyper::HeaderMap::new();
        assert!(!headers_request_websocket_upgrade(&headers));
    }

    #[test]
    fn connection_upgrade_alone_is_not_enough() {
        let mut headers = hyper::HeaderMap::new();
        headers.insert(hyper::header::CONNECTION, "Upgrade".parse().unwrap());
        assert!(!headers_request_websocket_upgrade(&headers));
    }
}
