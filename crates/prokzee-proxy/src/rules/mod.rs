//! Rule Engine: decides whether a captured request should pause for
//! operator approval.
//!
//! Rules are partitioned by their `operator`: all `And` rules must match
//! (an empty And-set matches vacuously), and at least one `Or` rule must
//! match when any `Or` rules exist. A request intercepts when both
//! partitions are satisfied. Each rule's `pattern` is compiled once and
//! cached; disabled rules are skipped entirely.

use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;

use crate::error::StoreError;
use crate::store::models::{InterceptRule, MatchType, Relationship, RuleOperator};

/// Extensions `file_extension` rules are allowed to match against. Any
/// other extension is treated as absent.
pub const STATIC_ASSET_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "svg", "webp", "ico", "tiff", "avif", "css", "less",
    "scss", "woff", "woff2", "ttf", "otf", "eot", "js", "mjs", "map", "json", "pdf", "doc",
    "docx", "xls", "xlsx", "ppt", "pptx", "mp3", "mp4", "wav", "avi", "mov", "webm", "ogg",
    "flac", "aac", "zip", "rar", "tar", "gz", "7z",
];

/// Extract the lowercase final dot-extension of `path` after stripping any
/// `?query`, restricted to [`STATIC_ASSET_EXTENSIONS`]. A path with no
/// extension, or an extension outside the static-asset set, yields `""`.
pub fn extract_file_extension(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    let Some(file_name) = path.rsplit('/').next() else {
        return String::new();
    };
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return String::new();
    };
    let ext = ext.to_ascii_lowercase();
    if STATIC_ASSET_EXTENSIONS.contains(&ext.as_str()) {
        ext
    } else {
        String::new()
    }
}

/// Validate a rule before it's written to the store: the name must
/// be non-empty and not collide with another rule's name, and the pattern
/// must compile. `existing` is every other currently stored rule (callers
/// exclude the rule being updated from this list by its own id).
pub fn validate_rule(rule: &InterceptRule, existing: &[InterceptRule]) -> Result<(), String> {
    if rule.name.trim().is_empty() {
        return Err("rule name must not be empty".to_string());
    }
    if existing.iter().any(|r| r.id != rule.id && r.name == rule.name) {
        return Err(format!("a rule named '{}' already exists", rule.name));
    }
    Regex::new(&rule.pattern).map_err(|e| format!("invalid pattern: {e}"))?;
    Ok(())
}

/// The subset of a captured request's fields rules can match against.
pub struct MatchContext<'a> {
    pub domain: &'a str,
    pub protocol: &'a str,
    pub method: &'a str,
    pub url: &'a str,
    pub path: &'a str,
    pub file_extension: &'a str,
    pub headers: &'a HashMap<String, String>,
}

struct CompiledRule {
    rule: InterceptRule,
    regex: Regex,
}

pub struct RuleEngine {
    compiled: RwLock<Vec<CompiledRule>>,
}

impl RuleEngine {
    pub fn new(rules: Vec<InterceptRule>) -> Result<Self, StoreError> {
        Ok(Self {
            compiled: RwLock::new(Self::compile_all(rules)?),
        })
    }

    fn compile_all(rules: Vec<InterceptRule>) -> Result<Vec<CompiledRule>, StoreError> {
        rules
            .into_iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern)?;
                Ok(CompiledRule { rule, regex })
            })
            .collect()
    }

    pub fn update(&self, rules: Vec<InterceptRule>) -> Result<(), StoreError> {
        let compiled = Self::compile_all(rules)?;
        *self.compiled.write() = compiled;
        Ok(())
    }

    /// Whether `ctx` should intercept, per the AND/OR partition described
    /// above. Disabled rules never participate.
    pub fn should_intercept(&self, ctx: &MatchContext) -> bool {
        let compiled = self.compiled.read();
        let mut and_rules = compiled.iter().filter(|c| c.rule.enabled && c.rule.operator == RuleOperator::And);
        let or_rules: Vec<_> = compiled
            .iter()
            .filter(|c| c.rule.enabled && c.rule.operator == RuleOperator::Or)
            .collect();

        let and_satisfied = and_rules.all(|c| Self::matches(c, ctx));
        let or_satisfied = or_rules.is_empty() || or_rules.iter().any(|c| Self::matches(c, ctx));

        and_satisfied && or_satisfied
    }

    fn matches(compiled: &CompiledRule, ctx: &MatchContext) -> bool {
        let subject = match compiled.rule.match_type {
            MatchType::Domain => ctx.domain,
            MatchType::Protocol => ctx.protocol,
            MatchType::Method => ctx.method,
            MatchType::Url => ctx.url,
            MatchType::Path => ctx.path,
            MatchType::FileExtension => ctx.file_extension,
            MatchType::Header => {
                return Self::header_matches(compiled, ctx);
            }
        };
        let is_match = compiled.regex.is_match(subject);
        match compiled.rule.relationship {
            Relationship::Matches => is_match,
            Relationship::DoesntMatch => !is_match,
        }
    }

    /// "header" matches against the concatenation `name: value`,
    /// checked per header.
    fn header_matches(compiled: &CompiledRule, ctx: &MatchContext) -> bool {
        let any_header_matches = ctx
            .headers
            .iter()
            .any(|(k, v)| compiled.regex.is_match(&format!("{k}: {v}")));
        match compiled.rule.relationship {
            Relationship::Matches => any_header_matches,
            Relationship::DoesntMatch => !any_header_matches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(headers: &'a HashMap<String, String>) -> MatchContext<'a> {
        MatchContext {
            domain: "api.example.com",
            protocol: "https",
            method: "POST",
            url: "https://api.example.com/v1/login",
            path: "/v1/login",
            file_extension: "",
            headers,
        }
    }

    fn rule(operator: RuleOperator, match_type: MatchType, relationship: Relationship, pattern: &str) -> InterceptRule {
        InterceptRule {
            id: 1,
            name: "r".into(),
            operator,
            match_type,
            relationship,
            pattern: pattern.into(),
            enabled: true,
        }
    }

    #[test]
    fn no_rules_intercepts_everything() {
        // Vacuous AND partition and an empty OR partition both default to
        // true, so an empty rule set intercepts everything
        // rather than nothing.
        let engine = RuleEngine::new(vec![]).unwrap();
        let headers = HashMap::new();
        assert!(engine.should_intercept(&ctx(&headers)));
    }

    #[test]
    fn and_rules_all_must_match() {
        let rules = vec![
            rule(RuleOperator::And, MatchType::Method, Relationship::Matches, "POST"),
            rule(RuleOperator::And, MatchType::Path, Relationship::Matches, "/login"),
        ];
        let engine = RuleEngine::new(rules).unwrap();
        let headers = HashMap::new();
        assert!(engine.should_intercept(&ctx(&headers)));
    }

    #[test]
    fn and_rule_failing_blocks_interception() {
        let rules = vec![rule(RuleOperator::And, MatchType::Method, Relationship::Matches, "GET")];
        let engine = RuleEngine::new(rules).unwrap();
        let headers = HashMap::new();
        assert!(!engine.should_intercept(&ctx(&headers)));
    }

    #[test]
    fn or_rules_need_only_one_match() {
        let rules = vec![
            rule(RuleOperator::Or, MatchType::Domain, Relationship::Matches, "^nope$"),
            rule(RuleOperator::Or, MatchType::Method, Relationship::Matches, "POST"),
        ];
        let engine = RuleEngine::new(rules).unwrap();
        let headers = HashMap::new();
        assert!(engine.should_intercept(&ctx(&headers)));
    }

    #[test]
    fn disabled_rule_is_ignored() {
        let mut r = rule(RuleOperator::And, MatchType::Method, Relationship::Matches, "GET");
        r.enabled = false;
        let engine = RuleEngine::new(vec![r]).unwrap();
        let headers = HashMap::new();
        assert!(engine.should_intercept(&ctx(&headers)));
    }

    #[test]
    fn header_rule_matches_key_or_value() {
        let mut headers = HashMap::new();
        headers.insert("X-Api-Key".to_string(), "secret".to_string());
        let rules = vec![rule(RuleOperator::And, MatchType::Header, Relationship::Matches, "X-Api-Key")];
        let engine = RuleEngine::new(rules).unwrap();
        assert!(engine.should_intercept(&ctx(&headers)));
    }

    #[test]
    fn validate_rejects_empty_name() {
        let mut r = rule(RuleOperator::And, MatchType::Method, Relationship::Matches, "GET");
        r.name = "  ".to_string();
        assert!(validate_rule(&r, &[]).is_err());
    }

    #[test]
    fn validate_rejects_duplicate_name_against_a_different_id() {
        let mut existing = rule(RuleOperator::And, MatchType::Method, Relationship::Matches, "GET");
        existing.id = 1;
        existing.name = "skip assets".to_string();
        let mut candidate = rule(RuleOperator::And, MatchType::Method, Relationship::Matches, "POST");
        candidate.id = 2;
        candidate.name = "skip assets".to_string();
        assert!(validate_rule(&candidate, &[existing]).is_err());
    }

    #[test]
    fn validate_allows_renaming_the_same_rule() {
        let mut existing = rule(RuleOperator::And, MatchType::Method, Relationship::Matches, "GET");
        existing.id = 1;
        existing.name = "skip assets".to_string();
        assert!(validate_rule(&existing, &[existing.clone()]).is_ok());
    }

    #[test]
    fn validate_rejects_invalid_regex() {
        let r = rule(RuleOperator::And, MatchType::Method, Relationship::Matches, "(unclosed");
        assert!(validate_rule(&r, &[]).is_err());
    }
}
