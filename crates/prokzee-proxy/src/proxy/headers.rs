//! Conversions between hyper's header/URI types and the plain
//! `HashMap<String, String>` shape the rest of the pipeline (broker,
//! match-replace, store, transport) is built around.

use std::collections::HashMap;

use hyper::HeaderMap;

/// Flatten a `HeaderMap` into a plain map. Hyper allows repeated header
/// names; the last occurrence wins, which matches what the rest of the
/// pipeline (a single `HashMap`) is able to represent.
pub fn header_map_to_hashmap(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::with_capacity(headers.len());
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            out.insert(name.as_str().to_string(), v.to_string());
        }
    }
    out
}

/// Rebuild a hyper `HeaderMap` from a plain map, skipping any entry whose
/// name or value isn't valid for the wire (rather than failing the whole
/// request over one bad header).
pub fn hashmap_to_header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let (Ok(name), Ok(value)) = (
            hyper::header::HeaderName::try_from(name.as_str()),
            hyper::header::HeaderValue::from_str(value),
        ) else {
            continue;
        };
        out.insert(name, value);
    }
    out
}

/// Split a request path into `(path, query)` the way `RequestRecord`
/// stores them: no leading `?`, empty string when absent.
pub fn split_path_query(path_and_query: &str) -> (String, String) {
    match path_and_query.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (path_and_query.to_string(), String::new()),
    }
}

/// Best-effort MIME type from a `Content-Type` header value: the part
/// before any `;` parameter (e.g. `charset=utf-8`).
pub fn mime_type_from_content_type(headers: &HashMap<String, String>) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.split(';').next().unwrap_or(v).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_query_separates_on_first_question_mark() {
        assert_eq!(split_path_query("/a/b?x=1&y=2"), ("/a/b".to_string(), "x=1&y=2".to_string()));
        assert_eq!(split_path_query("/a/b"), ("/a/b".to_string(), String::new()));
    }

    #[test]
    fn mime_type_strips_parameters() {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json; charset=utf-8".to_string());
        assert_eq!(mime_type_from_content_type(&headers), Some("application/json".to_string()));
    }

    #[test]
    fn header_map_round_trips_through_hashmap() {
        let mut map = HeaderMap::new();
        map.insert("X-Test", "value".parse().unwrap());
        let hm = header_map_to_hashmap(&map);
        assert_eq!(hm.get("X-Test"), Some(&"value".to_string()));
        let back = hashmap_to_header_map(&hm);
        assert_eq!(back.get("X-Test").unwrap(), "value");
    }
}
