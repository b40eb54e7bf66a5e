//! Match-Replace Engine: unconditional rewrite applied to in-scope,
//! intercepted traffic.
//!
//! No regex and no recompilation: `body` rules are a literal substring
//! replace over the decoded body text; `header` rules parse `match_content`
//! as `"Name: Value"` and overwrite that header's value with
//! `replace_content` only when the header is currently present and equal
//! to that exact value. Rules apply in load order. If a rule changes the
//! body, `Content-Length` is recomputed against the new byte length.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::store::models::{MatchReplaceMatchType, MatchReplaceRule, MatchReplaceTarget};

pub struct MatchReplaceEngine {
    rules: RwLock<Vec<MatchReplaceRule>>,
}

/// Validate a rule before it's written to the store: the name must be
/// non-empty, and a `header` rule's `match_content` must take the
/// `"Name: Value"` shape the matcher expects (same check as
/// `Config::validate` applies to a config file's `match_replace` section).
pub fn validate_match_replace_rule(rule: &MatchReplaceRule) -> Result<(), String> {
    if rule.name.trim().is_empty() {
        return Err("match-replace rule name must not be empty".to_string());
    }
    if rule.match_type == MatchReplaceMatchType::Header && !rule.match_content.contains(':') {
        return Err("header rule's match_content must be \"Name: Value\"".to_string());
    }
    Ok(())
}

impl MatchReplaceEngine {
    pub fn new(rules: Vec<MatchReplaceRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    pub fn update(&self, rules: Vec<MatchReplaceRule>) {
        *self.rules.write() = rules;
    }

    /// Apply every enabled rule targeting `target` to `headers`/`body`, in
    /// stored order, then fix up `Content-Length` if the body moved.
    pub fn apply(&self, target: MatchReplaceTarget, headers: &mut HashMap<String, String>, body: &mut Vec<u8>) {
        let rules = self.rules.read();
        let original_len = body.len();
        let mut body_changed = false;

        for rule in rules.iter().filter(|r| r.enabled && r.target == target) {
            match rule.match_type {
                MatchReplaceMatchType::Header => Self::apply_header(rule, headers),
                MatchReplaceMatchType::Body => {
                    if Self::apply_body(rule, body) {
                        body_changed = true;
                    }
                }
            }
        }

        if body_changed && body.len() != original_len {
            Self::sync_content_length(headers, body.len());
        }
    }

    /// `match_content` is `"Name: Value"`; if `headers[name] == value`,
    /// overwrite it with `replace_content`.
    fn apply_header(rule: &MatchReplaceRule, headers: &mut HashMap<String, String>) {
        let Some((name, value)) = rule.match_content.split_once(':') else {
            return;
        };
        let name = name.trim();
        let value = value.trim();

        let current = headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(k, _)| k.clone());
        if let Some(key) = current {
            if headers.get(&key).map(|v| v.as_str()) == Some(value) {
                headers.insert(key, rule.replace_content.clone());
            }
        }
    }

    /// Literal substring replace over the body, treated as UTF-8 text; a
    /// non-UTF-8 body is left untouched rather than corrupted.
    fn apply_body(rule: &MatchReplaceRule, body: &mut Vec<u8>) -> bool {
        let Ok(text) = std::str::from_utf8(body) else {
            return false;
        };
        if !text.contains(rule.match_content.as_str()) {
            return false;
        }
        let replaced = text.replace(rule.match_content.as_str(), &rule.replace_content);
        *body = replaced.into_bytes();
        true
    }

    fn sync_content_length(headers: &mut HashMap<String, String>, new_len: usize) {
        let key = headers.iter().find(|(k, _)| k.eq_ignore_ascii_case("content-length")).map(|(k, _)| k.clone());
        if let Some(key) = key {
            headers.insert(key, new_len.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_rule(match_content: &str, replace_content: &str, target: MatchReplaceTarget) -> MatchReplaceRule {
        MatchReplaceRule {
            id: 1,
            name: "r".into(),
            match_type: MatchReplaceMatchType::Body,
            match_content: match_content.into(),
            replace_content: replace_content.into(),
            target,
            enabled: true,
        }
    }

    #[test]
    fn body_rule_rewrites_literal_substring() {
        let engine = MatchReplaceEngine::new(vec![body_rule("hunter2", "REDACTED", MatchReplaceTarget::Request)]);
        let mut headers = HashMap::new();
        let mut body = b"user=alice&password=hunter2".to_vec();
        engine.apply(MatchReplaceTarget::Request, &mut headers, &mut body);
        assert_eq!(String::from_utf8(body).unwrap(), "user=alice&password=REDACTED");
    }

    #[test]
    fn body_rule_does_not_treat_match_content_as_regex() {
        let engine = MatchReplaceEngine::new(vec![body_rule("a.b", "X", MatchReplaceTarget::Request)]);
        let mut headers = HashMap::new();
        let mut body = b"a.b and aXb".to_vec();
        engine.apply(MatchReplaceTarget::Request, &mut headers, &mut body);
        assert_eq!(String::from_utf8(body).unwrap(), "X and aXb");
    }

    #[test]
    fn disabled_rule_is_a_no_op() {
        let mut rule = body_rule("foo", "bar", MatchReplaceTarget::Request);
        rule.enabled = false;
        let engine = MatchReplaceEngine::new(vec![rule]);
        let mut headers = HashMap::new();
        let mut body = b"foo".to_vec();
        engine.apply(MatchReplaceTarget::Request, &mut headers, &mut body);
        assert_eq!(body, b"foo");
    }

    #[test]
    fn rule_targeting_response_does_not_touch_request() {
        let engine = MatchReplaceEngine::new(vec![body_rule("foo", "bar", MatchReplaceTarget::Response)]);
        let mut headers = HashMap::new();
        let mut body = b"foo".to_vec();
        engine.apply(MatchReplaceTarget::Request, &mut headers, &mut body);
        assert_eq!(body, b"foo");
        engine.apply(MatchReplaceTarget::Response, &mut headers, &mut body);
        assert_eq!(body, b"bar");
    }

    #[test]
    fn header_rule_requires_exact_value_match() {
        let rule = MatchReplaceRule {
            id: 2,
            name: "strip-auth".into(),
            match_type: MatchReplaceMatchType::Header,
            match_content: "Authorization: Bearer abc123".into(),
            replace_content: "Bearer REDACTED".into(),
            target: MatchReplaceTarget::Request,
            enabled: true,
        };
        let engine = MatchReplaceEngine::new(vec![rule]);
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer abc123".to_string());
        let mut body = Vec::new();
        engine.apply(MatchReplaceTarget::Request, &mut headers, &mut body);
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer REDACTED");

        let mut headers2 = HashMap::new();
        headers2.insert("Authorization".to_string(), "Bearer other".to_string());
        engine.apply(MatchReplaceTarget::Request, &mut headers2, &mut body);
        assert_eq!(headers2.get("Authorization").unwrap(), "Bearer other");
    }

    #[test]
    fn body_change_updates_content_length_header() {
        let engine = MatchReplaceEngine::new(vec![body_rule("hi", "hello there", MatchReplaceTarget::Request)]);
        let mut headers = HashMap::new();
        headers.insert("Content-Length".to_string(), "2".to_string());
        let mut body = b"hi".to_vec();
        engine.apply(MatchReplaceTarget::Request, &mut headers, &mut body);
        assert_eq!(headers.get("Content-Length").unwrap(), &body.len().to_string());
    }

    #[test]
    fn rules_apply_in_stored_order() {
        let rules = vec![
            body_rule("foo", "bar", MatchReplaceTarget::Request),
            body_rule("bar", "baz", MatchReplaceTarget::Request),
        ];
        let engine = MatchReplaceEngine::new(rules);
        let mut headers = HashMap::new();
        let mut body = b"foo".to_vec();
        engine.apply(MatchReplaceTarget::Request, &mut headers, &mut body);
        assert_eq!(body, b"baz");
    }
}
