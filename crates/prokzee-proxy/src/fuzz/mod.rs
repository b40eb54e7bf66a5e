//! Fuzz Driver: substitutes payload-set values into a templated request
//! and replays it once per index.
//!
//! Payload sets are iterated index-aligned, not as a Cartesian product:
//! position `i` of every set is substituted together, and the loop runs
//! for `min` of all sets' expanded lengths. A set with more values than
//! the shortest one simply has its tail truncated; this is flagged to
//! the operator via the `dropped` count in [`FuzzSummary`] rather than
//! silently iterating past the other sets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::events::{EventBus, Topic};
use crate::replay::ReplayDriver;
use crate::store::models::{FuzzTab, PayloadSet};

/// Placeholder for payload set `k`, 1-indexed, e.g. `[__Inject-Here__[1]]`
/// for the first set.
fn placeholder(idx: usize) -> String {
    format!("[__Inject-Here__[{}]]", idx + 1)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FuzzStepResult {
    pub index: usize,
    pub payloads: String,
    pub status: u16,
    pub length: usize,
    pub content_type: Option<String>,
    pub response_headers: HashMap<String, String>,
    pub response_body: Vec<u8>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FuzzProgress {
    pub tab_id: i64,
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FuzzSummary {
    pub tab_id: i64,
    pub total_requests: usize,
    pub dropped: usize,
    pub results: Vec<FuzzStepResult>,
}

pub struct FuzzDriver {
    replay: ReplayDriver,
}

impl Default for FuzzDriver {
    fn default() -> Self {
        Self {
            replay: ReplayDriver::new(),
        }
    }
}

impl FuzzDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the fuzz tab to completion, starting from `start_from` (so a
    /// resumed run skips indices already recorded), publishing a
    /// `backend:fuzzerProgress` counter and a `backend:fuzzerResult`
    /// payload after every step, and a final `backend:fuzzerFinished` once
    /// the run drains or `stop` is set.
    pub async fn run(&self, tab: &FuzzTab, bus: &EventBus, start_from: usize, stop: &AtomicBool) -> FuzzSummary {
        let expanded: Vec<Vec<String>> = tab.payload_sets.iter().map(PayloadSet::expand).collect();
        let lengths: Vec<usize> = expanded.iter().map(|v| v.len()).collect();
        let min_len = lengths.iter().copied().min().unwrap_or(0);
        let dropped = lengths.iter().map(|len| len.saturating_sub(min_len)).sum();

        let mut results = Vec::with_capacity(min_len.saturating_sub(start_from));
        for i in start_from..min_len {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let payloads: Vec<String> = expanded.iter().map(|set| set[i].clone()).collect();
            let (url, body) = Self::substitute(&tab.path, &tab.target_url, &tab.body, &payloads);
            let headers = Self::substitute_headers(&tab.headers, &payloads);

            let result = self
                .replay
                .send(&tab.protocol_version, &tab.method, &url, &headers, body.into_bytes())
                .await;
            let content_type = result.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case("content-type")).map(|(_, v)| v.clone());
            let step = FuzzStepResult {
                index: i,
                payloads: payloads.join(","),
                status: result.status,
                length: result.body.len(),
                content_type,
                response_headers: result.headers,
                response_body: result.body,
            };
            bus.publish(Topic::FuzzerResult, &step);
            results.push(step);
            bus.publish(
                Topic::FuzzerProgress,
                &FuzzProgress { tab_id: tab.id, completed: i + 1, total: min_len },
            );
        }

        let summary = FuzzSummary {
            tab_id: tab.id,
            total_requests: min_len,
            dropped,
            results,
        };
        bus.publish(Topic::FuzzerFinished, &summary);
        summary
    }

    /// Replace `[__Inject-Here__[1]]`, `[__Inject-Here__[2]]`, ...
    /// placeholders in the path/body with the corresponding payload, and
    /// rebuild the full URL against `target_url`.
    fn substitute(path: &str, target_url: &str, body: &str, payloads: &[String]) -> (String, String) {
        let path = Self::substitute_str(path, payloads);
        let body = Self::substitute_str(body, payloads);
        let base = target_url.trim_end_matches('/');
        let full_path = if path.starts_with('/') { path } else { format!("/{path}") };
        (format!("{base}{full_path}"), body)
    }

    fn substitute_headers(headers: &HashMap<String, String>, payloads: &[String]) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(k, v)| (k.clone(), Self::substitute_str(v, payloads)))
            .collect()
    }

    fn substitute_str(template: &str, payloads: &[String]) -> String {
        let mut out = template.to_string();
        for (idx, value) in payloads.iter().enumerate() {
            out = out.replace(&placeholder(idx), value);
        }
        out
    }

    /// Decompress a gzip response body when a handler needs the plain
    /// bytes for inspection or diffing.
    pub fn decompress_gzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
        use std::io::Read;
        let mut decoder = flate2::read::GzDecoder::new(body);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_replaces_indexed_placeholders() {
        let (url, body) = FuzzDriver::substitute(
            "/users/[__Inject-Here__[1]]",
            "https://example.com",
            "id=[__Inject-Here__[1]]&name=[__Inject-Here__[2]]",
            &["42".to_string(), "alice".to_string()],
        );
        assert_eq!(url, "https://example.com/users/42");
        assert_eq!(body, "id=42&name=alice");
    }

    #[test]
    fn substitute_with_a_single_payload_set_uses_index_one() {
        let (url, _body) = FuzzDriver::substitute(
            "/users/[__Inject-Here__[1]]",
            "https://example.com",
            "",
            &["7".to_string()],
        );
        assert_eq!(url, "https://example.com/users/7");
    }

    #[test]
    fn payload_set_list_expands_to_itself() {
        let set = PayloadSet::List {
            values: vec!["a".into(), "b".into()],
        };
        assert_eq!(set.expand(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn payload_set_sequence_expands_inclusive() {
        let set = PayloadSet::Sequence { from: 1, to: 5, step: 2 };
        assert_eq!(set.expand(), vec!["1", "3", "5"]);
    }

    #[test]
    fn index_alignment_truncates_to_shortest_set_and_reports_dropped() {
        let tab = FuzzTab {
            id: 1,
            name: "t".into(),
            target_url: "https://example.com".into(),
            method: "GET".into(),
            path: "/§0§/§1§".into(),
            protocol_version: "HTTP/1.1".into(),
            headers: HashMap::new(),
            body: String::new(),
            payload_sets: vec![
                PayloadSet::List { values: vec!["a".into(), "b".into(), "c".into()] },
                PayloadSet::List { values: vec!["x".into()] },
            ],
        };
        let expanded: Vec<Vec<String>> = tab.payload_sets.iter().map(PayloadSet::expand).collect();
        let lengths: Vec<usize> = expanded.iter().map(|v| v.len()).collect();
        let min_len = lengths.iter().copied().min().unwrap();
        assert_eq!(min_len, 1);
        let dropped: usize = lengths.iter().map(|len| len.saturating_sub(min_len)).sum();
        assert_eq!(dropped, 2);
    }
}
