//! The Admin API: a hand-rolled REST + WebSocket control surface
//! over the proxy core, mirroring [`crate::proxy::server::ProxyServer`]'s
//! own accept-loop style rather than pulling in a web framework.
//!
//! Plain HTTP requests are served by [`hyper`] through [`route`]; a
//! connection whose first bytes look like a WebSocket upgrade for
//! `/events` is instead handed to [`ws::handle`], which runs its own
//! handshake via `tokio-tungstenite` directly over the raw TCP stream.

pub mod handlers;
pub mod state;
pub mod types;
pub mod ws;

pub use state::{AppState, FuzzRegistry, ReplayRegistry};

use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::{TcpListener, TcpStream};

use types::{error_response, not_found};

pub struct AdminApiServer {
    addr: SocketAddr,
    state: AppState,
}

impl AdminApiServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self { addr, state }
    }

    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, "admin API listening");

        loop {
            let (stream, peer) = listener.accept().await?;
            let state = self.state.clone();

            tokio::spawn(async move {
                match is_events_upgrade(&stream).await {
                    Ok(true) => {
                        if let Err(err) = ws::handle(stream, state).await {
                            tracing::debug!(%peer, error = %err, "admin websocket connection ended");
                        }
                    }
                    Ok(false) => {
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |req: Request<Incoming>| {
                            let state = state.clone();
                            async move { route(state, req).await }
                        });
                        if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                            .serve_connection_with_upgrades(io, service)
                            .await
                        {
                            tracing::debug!(%peer, error = %err, "admin connection ended");
                        }
                    }
                    Err(err) => tracing::debug!(%peer, error = %err, "failed to peek admin connection"),
                }
            });
        }
    }
}

/// Peek (never consume) the first bytes of a fresh connection to decide
/// whether it's a `GET /events` WebSocket upgrade before handing it to
/// either `hyper` or `tokio-tungstenite`.
async fn is_events_upgrade(stream: &TcpStream) -> std::io::Result<bool> {
    let mut buf = [0u8; 2048];
    let n = stream.peek(&mut buf).await?;
    let text = String::from_utf8_lossy(&buf[..n]);
    let first_line = text.lines().next().unwrap_or("");
    let lower = text.to_ascii_lowercase();
    Ok(first_line.starts_with("GET /events") && lower.contains("upgrade: websocket"))
}

async fn route(state: AppState, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let (path, query) = split_path_query(req.uri().path_and_query().map(|p| p.as_str()).unwrap_or("/"));
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    // Resolve any `{id}` segment to an owned `i64` *before* matching on a
    // branch that also needs to move `req` — `id` as matched below still
    // borrows `path`, which borrows `req.uri()`, so parsing it up front
    // (and dropping the borrow) is what lets the arm bodies consume `req`.
    let id = match segments.as_slice() {
        [_, id] | [_, id, _] => match id.parse::<i64>() {
            Ok(id) => Ok(id),
            Err(_) => Err(format!("invalid id: {id}")),
        },
        _ => Ok(0),
    };
    let kind: Vec<&str> = segments.iter().map(|s| if s.parse::<i64>().is_ok() { "{id}" } else { *s }).collect();

    let response = match (&method, kind.as_slice()) {
        (&Method::GET, ["scope"]) => handlers::scope::handle_get(&state).await,
        (&Method::PUT, ["scope"]) => handlers::scope::handle_put(&state, req).await,

        (&Method::GET, ["intercept"]) => handlers::intercept::handle_get(&state).await,
        (&Method::PUT, ["intercept"]) => handlers::intercept::handle_put(&state, req).await,

        (&Method::GET, ["rules"]) => handlers::rules::handle_list(&state).await,
        (&Method::POST, ["rules"]) => handlers::rules::handle_create(&state, req).await,
        (&Method::PUT, ["rules", "{id}"]) => with_id(id, |id| handlers::rules::handle_update(&state, id, req)).await,
        (&Method::DELETE, ["rules", "{id}"]) => with_id(id, |id| handlers::rules::handle_delete(&state, id)).await,

        (&Method::GET, ["match-replace"]) => handlers::matchreplace::handle_list(&state).await,
        (&Method::POST, ["match-replace"]) => handlers::matchreplace::handle_create(&state, req).await,
        (&Method::PUT, ["match-replace", "{id}"]) => with_id(id, |id| handlers::matchreplace::handle_update(&state, id, req)).await,
        (&Method::DELETE, ["match-replace", "{id}"]) => with_id(id, |id| handlers::matchreplace::handle_delete(&state, id)).await,

        (&Method::GET, ["requests"]) => handlers::requests::handle_list(&state, query).await,
        (&Method::GET, ["requests", "{id}"]) => with_id(id, |id| handlers::requests::handle_get(&state, id)).await,

        (&Method::GET, ["replay"]) => handlers::replay::handle_list(&state).await,
        (&Method::POST, ["replay"]) => handlers::replay::handle_create(&state, req).await,
        (&Method::GET, ["replay", "{id}"]) => with_id(id, |id| handlers::replay::handle_get(&state, id)).await,
        (&Method::PUT, ["replay", "{id}"]) => with_id(id, |id| handlers::replay::handle_rename(&state, id, req)).await,
        (&Method::DELETE, ["replay", "{id}"]) => with_id(id, |id| handlers::replay::handle_delete(&state, id)).await,
        (&Method::POST, ["replay", "{id}", "send"]) => with_id(id, |id| handlers::replay::handle_send(&state, id, req)).await,
        (&Method::POST, ["replay", "{id}", "cancel"]) => with_id(id, |id| handlers::replay::handle_cancel(&state, id)).await,

        (&Method::GET, ["fuzz"]) => handlers::fuzz::handle_list(&state).await,
        (&Method::POST, ["fuzz"]) => handlers::fuzz::handle_create(&state, req).await,
        (&Method::GET, ["fuzz", "{id}"]) => with_id(id, |id| handlers::fuzz::handle_get(&state, id)).await,
        (&Method::PUT, ["fuzz", "{id}"]) => with_id(id, |id| handlers::fuzz::handle_update(&state, id, req)).await,
        (&Method::DELETE, ["fuzz", "{id}"]) => with_id(id, |id| handlers::fuzz::handle_delete(&state, id)).await,
        (&Method::POST, ["fuzz", "{id}", "start"]) => with_id(id, |id| handlers::fuzz::handle_start(&state, id, req)).await,
        (&Method::POST, ["fuzz", "{id}", "stop"]) => with_id(id, |id| handlers::fuzz::handle_stop(&state, id)).await,

        (&Method::POST, ["oob", "start"]) => handlers::oob::handle_start(&state, req).await,
        (&Method::POST, ["oob", "regenerate"]) => handlers::oob::handle_regenerate(&state).await,
        (&Method::POST, ["oob", "update-host"]) => handlers::oob::handle_update_host(&state, req).await,
        (&Method::POST, ["oob", "stop"]) => handlers::oob::handle_stop(&state).await,

        (&Method::GET, ["ca", "info"]) => handlers::ca::handle_info(&state).await,
        (&Method::GET, ["ca", "rootCA.pem"]) => handlers::ca::handle_root_cert(&state).await,

        _ => not_found(),
    };

    Ok(response)
}

/// Run `f` with the `i64` id parsed earlier, or short-circuit with the
/// parse error captured before `req` was moved into this call.
async fn with_id<F, Fut>(id: Result<i64, String>, f: F) -> Response<Full<Bytes>>
where
    F: FnOnce(i64) -> Fut,
    Fut: std::future::Future<Output = Response<Full<Bytes>>>,
{
    match id {
        Ok(id) => f(id).await,
        Err(message) => error_response(StatusCode::BAD_REQUEST, message),
    }
}

fn split_path_query(path_and_query: &str) -> (&str, Option<&str>) {
    match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    }
}
