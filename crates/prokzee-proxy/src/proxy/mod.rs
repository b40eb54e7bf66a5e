//! The intercepting HTTPS MITM proxy: one accept loop that answers
//! the `prokzee` CA-download host directly, splices `CONNECT` tunnels
//! (terminating TLS with an on-the-fly leaf cert when the tunnel carries
//! TLS, or opaquely otherwise), and runs every decrypted or plain-HTTP
//! request through the capture/approval/match-replace pipeline in
//! [`handler`].
//!
//! # Module structure
//!
//! - `server` — `ProxyServer`, the accept loop and per-connection dispatch
//! - `handler` — the per-request pipeline (scope, rules, approval, forward)
//! - `connect` — `CONNECT` tunneling and the TLS MITM splice
//! - `tls` — upstream cert verifier and the SNI leaf cert resolver
//! - `transport` — protocol-version-constrained outbound HTTP client
//! - `cahost` — the `prokzee` CA-download surface
//! - `errorpage` — the branded HTML error page
//! - `multipart` — multipart/form-data re-encoding on edit
//! - `headers` — hyper <-> plain-map header/URI conversions
//! - `network` — `SO_REUSEPORT` listener setup

mod cahost;
mod connect;
mod errorpage;
mod handler;
mod headers;
mod multipart;
mod network;
mod server;
mod tls;
pub mod transport;

pub use handler::ProxyShared;
pub use server::ProxyServer;
