//! The listening proxy server: one accept loop dispatching
//! each connection to a per-request hyper service that either answers the
//! `prokzee` CA-download host directly, opens a `CONNECT` tunnel, or runs
//! a plain-HTTP request straight through [`super::handler`].

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};

use crate::broker::ApprovalBroker;
use crate::ca::CaManager;
use crate::events::EventBus;
use crate::matchreplace::MatchReplaceEngine;
use crate::rules::RuleEngine;
use crate::scope::ScopeFilter;
use crate::store::Store;

use super::cahost;
use super::connect;
use super::handler::{self, ProxyShared};
use super::network::create_reusable_listener;

/// The running proxy listener, holding everything request handling needs
/// behind `Arc`s so every accepted connection can clone a cheap handle.
pub struct ProxyServer {
    addr: SocketAddr,
    ca: Arc<CaManager>,
    scope: Arc<ScopeFilter>,
    rules: Arc<RuleEngine>,
    match_replace: Arc<MatchReplaceEngine>,
    broker: Arc<ApprovalBroker>,
    store: Arc<Store>,
    bus: Arc<EventBus>,
    intercept_enabled: Arc<AtomicBool>,
}

impl ProxyServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        addr: SocketAddr,
        ca: Arc<CaManager>,
        scope: Arc<ScopeFilter>,
        rules: Arc<RuleEngine>,
        match_replace: Arc<MatchReplaceEngine>,
        broker: Arc<ApprovalBroker>,
        store: Arc<Store>,
        bus: Arc<EventBus>,
        intercept_enabled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            addr,
            ca,
            scope,
            rules,
            match_replace,
            broker,
            store,
            bus,
            intercept_enabled,
        }
    }

    /// Bind and serve forever, accepting one connection at a time and
    /// spawning a task per connection so a slow client never blocks
    /// others.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = create_reusable_listener(self.addr)?;
        tracing::info!(addr = %self.addr, "proxy listening");

        loop {
            let (stream, peer) = listener.accept().await?;
            let shared = self.shared_for_connection();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req: Request<Incoming>| {
                    let shared = shared.clone();
                    async move { route(shared, req).await }
                });

                if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection_with_upgrades(io, service)
                    .await
                {
                    tracing::debug!(%peer, error = %err, "connection ended");
                }
            });
        }
    }

    fn shared_for_connection(&self) -> ProxyShared {
        ProxyShared {
            ca: self.ca.clone(),
            scope: self.scope.clone(),
            rules: self.rules.clone(),
            match_replace: self.match_replace.clone(),
            broker: self.broker.clone(),
            store: self.store.clone(),
            bus: self.bus.clone(),
            intercept_enabled: self.intercept_enabled.clone(),
            is_tls: false,
            domain: String::new(),
            port: 80,
        }
    }
}

async fn route(shared: ProxyShared, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, hyper::Error> {
    if req.method() == Method::CONNECT {
        return Ok(connect::handle_connect(shared, req));
    }

    let host = host_of(&req);
    if cahost::is_cahost_request(&host) {
        return Ok(cahost::serve(&shared.ca, &req));
    }

    let (domain, port) = split_host_port(&host, false);
    let shared = ProxyShared { domain, port, ..shared };

    match handler::handle_request(shared, req).await {
        Ok(resp) => Ok(resp),
        Err(_) => Ok(Response::builder()
            .status(StatusCode::BAD_GATEWAY)
            .body(Full::new(Bytes::from_static(b"ProKZee: malformed request")))
            .expect("static response is always valid")),
    }
}

fn host_of(req: &Request<Incoming>) -> String {
    req.uri()
        .authority()
        .map(|a| a.to_string())
        .or_else(|| req.headers().get(hyper::header::HOST).and_then(|v| v.to_str().ok()).map(|s| s.to_string()))
        .unwrap_or_default()
}

fn split_host_port(host: &str, is_tls: bool) -> (String, u16) {
    let default_port = if is_tls { 443 } else { 80 };
    match host.rsplit_once(':') {
        Some((h, p)) => (h.to_string(), p.parse().unwrap_or(default_port)),
        None => (host.to_string(), default_port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_host_and_port_falling_back_to_scheme_default() {
        assert_eq!(split_host_port("example.com:8080", false), ("example.com".to_string(), 8080));
        assert_eq!(split_host_port("example.com", false), ("example.com".to_string(), 80));
        assert_eq!(split_host_port("example.com", true), ("example.com".to_string(), 443));
    }
}
