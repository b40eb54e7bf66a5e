//! Persisted and in-memory record types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A captured request/response pair. `id` is store-assigned; `external_id`
/// is the UUID allocated by the Approval Broker at capture time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestRecord {
    pub id: i64,
    pub external_id: String,
    pub url: String,
    pub method: String,
    pub domain: String,
    pub port: u16,
    pub path: String,
    pub query: String,
    pub protocol_version: String,
    pub request_headers: String,
    pub request_body: String,
    pub response_headers: Option<String>,
    pub response_body: Option<String>,
    pub status: Option<u16>,
    pub length: Option<i64>,
    pub mime_type: Option<String>,
    pub timestamp: i64,
}

impl RequestRecord {
    /// Reconstruct the URL from its constituent parts, matching the
    /// invariant `domain+port+path+query reconstructs url`.
    pub fn build_url(protocol_is_https: bool, domain: &str, port: u16, path: &str, query: &str) -> String {
        let scheme = if protocol_is_https { "https" } else { "http" };
        let default_port = if protocol_is_https { 443 } else { 80 };
        let host = if port == default_port {
            domain.to_string()
        } else {
            format!("{domain}:{port}")
        };
        if query.is_empty() {
            format!("{scheme}://{host}{path}")
        } else {
            format!("{scheme}://{host}{path}?{query}")
        }
    }
}

/// Two ordered sequences of regex patterns; `out` always wins over `in`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScopeList {
    #[serde(rename = "in")]
    pub in_scope: Vec<String>,
    #[serde(rename = "out")]
    pub out_scope: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Domain,
    Protocol,
    Method,
    Url,
    Path,
    FileExtension,
    Header,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relationship {
    #[serde(rename = "matches")]
    Matches,
    #[serde(rename = "doesn't match")]
    DoesntMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterceptRule {
    pub id: i64,
    pub name: String,
    pub operator: RuleOperator,
    pub match_type: MatchType,
    pub relationship: Relationship,
    pub pattern: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReplaceMatchType {
    Header,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReplaceTarget {
    Request,
    Response,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchReplaceRule {
    pub id: i64,
    pub name: String,
    pub match_type: MatchReplaceMatchType,
    pub match_content: String,
    pub replace_content: String,
    pub target: MatchReplaceTarget,
    pub enabled: bool,
}

/// In-memory only; owned exclusively by the Approval Broker.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_id: String,
    pub captured_at: chrono::DateTime<chrono::Utc>,
    pub http_request: HttpRequestSnapshot,
}

/// A plain snapshot of a captured request, decoupled from hyper's types so
/// it can sit in maps and be echoed back verbatim on drain/timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequestSnapshot {
    pub method: String,
    pub url: String,
    pub protocol_version: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// The decision delivered by the operator UI (or synthesized on drain).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub request_id: String,
    pub approved: bool,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub method: String,
    pub protocol_version: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayTab {
    pub id: i64,
    pub name: String,
    pub request_ids: Vec<i64>,
    pub current_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum PayloadSet {
    List { values: Vec<String> },
    Sequence { from: i64, to: i64, step: i64 },
}

impl PayloadSet {
    /// Expand a `Sequence` into concrete string values; a `List` is
    /// returned as-is. Sequence sets are expanded once, on FuzzTab start.
    pub fn expand(&self) -> Vec<String> {
        match self {
            PayloadSet::List { values } => values.clone(),
            PayloadSet::Sequence { from, to, step } => {
                let step = if *step == 0 { 1 } else { *step };
                let mut out = Vec::new();
                if step > 0 {
                    let mut v = *from;
                    while v <= *to {
                        out.push(v.to_string());
                        v += step;
                    }
                } else {
                    let mut v = *from;
                    while v >= *to {
                        out.push(v.to_string());
                        v += step;
                    }
                }
                out
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FuzzTab {
    pub id: i64,
    pub name: String,
    pub target_url: String,
    pub method: String,
    pub path: String,
    pub protocol_version: String,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub payload_sets: Vec<PayloadSet>,
}

/// Reporting-only summary of the CA's current root certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaInfo {
    pub subject: String,
    pub serial_hex: String,
    pub not_after: String,
}

/// Pagination / search parameters for `Store::list_requests`.
#[derive(Debug, Clone, Default)]
pub struct ListRequestsQuery {
    pub page: u32,
    pub limit: u32,
    pub sort_key: String,
    pub sort_dir: SortDir,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

impl SortDir {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}
