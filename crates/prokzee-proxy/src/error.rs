//! Error types for the proxy core.
//!
//! Follows the pack convention of `thiserror` enums per subsystem and
//! `anyhow` at the CLI boundary: components return typed errors, `main.rs`
//! wraps them with `anyhow::Context` for the human-facing message.

use thiserror::Error;

/// Fatal errors that prevent the process from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to bind listener on {addr}: {source}")]
    ListenerBind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        path: String,
        #[source]
        source: StoreError,
    },

    #[error("CA initialization failed: {0}")]
    Ca(String),
}

impl StartupError {
    /// Process exit code per the documented contract: 0 normal, 1
    /// configuration error, 2 listener bind failure, 3 database open failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            StartupError::Config(_) => 1,
            StartupError::ListenerBind { .. } => 2,
            StartupError::DatabaseOpen { .. } => 3,
            StartupError::Ca(_) => 1,
        }
    }
}

/// Recoverable, per-request errors surfaced to the client as the HTML error
/// page or logged and otherwise swallowed.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream connection failed: {0}")]
    Upstream(String),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("failed to read request or response body: {0}")]
    Body(String),

    #[error("approval timed out after {0:?}")]
    ApprovalTimeout(std::time::Duration),

    #[error("request was dropped by operator")]
    Dropped,
}

impl ProxyError {
    /// HTTP status code to present to the client for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::Upstream(_) => 502,
            ProxyError::Tls(_) => 502,
            ProxyError::Body(_) => 500,
            ProxyError::ApprovalTimeout(_) => 504,
            ProxyError::Dropped => 403,
        }
    }
}

/// Store-level errors. A lock error is retried once by the caller;
/// every other variant is surfaced as a `backend:error` event while the
/// triggering request still completes.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database is locked")]
    Locked,

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("record {0} not found")]
    NotFound(i64),

    #[error("invalid regex in rule: {0}")]
    InvalidRegex(#[from] regex::Error),
}
