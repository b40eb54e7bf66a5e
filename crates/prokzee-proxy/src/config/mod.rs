//! Configuration for the ProKZee proxy core.

mod listen;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use listen::{AdminApiConfig, ListenConfig};

use crate::store::models::{InterceptRule, MatchReplaceRule, ScopeList};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,

    #[serde(default)]
    pub admin_api: AdminApiConfig,

    /// Path to the sqlite database; defaults to `<ca_dir>/requests.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,

    #[serde(default)]
    pub scope: ScopeList,

    #[serde(default)]
    pub rules: Vec<InterceptRule>,

    #[serde(default)]
    pub match_replace: Vec<MatchReplaceRule>,

    #[serde(default)]
    pub intercept_enabled: bool,

    /// Interactsh-compatible OOB listener server, e.g. `https://oast.fun`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oob_server: Option<String>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.as_ref().display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.as_ref().display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration. Listener addresses must parse, rule/scope
    /// regex patterns must compile, and `match_replace` rules must name a
    /// valid target.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.listen
            .addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow::anyhow!("invalid listen.addr '{}': {e}", self.listen.addr))?;
        self.admin_api
            .addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow::anyhow!("invalid admin_api.addr '{}': {e}", self.admin_api.addr))?;

        for pattern in self.scope.in_scope.iter().chain(self.scope.out_scope.iter()) {
            regex::Regex::new(pattern).map_err(|e| anyhow::anyhow!("invalid scope pattern '{pattern}': {e}"))?;
        }

        for rule in &self.rules {
            regex::Regex::new(&rule.pattern)
                .map_err(|e| anyhow::anyhow!("invalid pattern in rule '{}': {e}", rule.name))?;
        }

        for rule in &self.match_replace {
            if rule.name.trim().is_empty() {
                anyhow::bail!("match_replace rule is missing a name");
            }
            if rule.match_type == crate::store::models::MatchReplaceMatchType::Header
                && !rule.match_content.contains(':')
            {
                anyhow::bail!(
                    "match_replace rule '{}' is a header rule but match_content isn't 'Name: Value'",
                    rule.name
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.listen.addr, "127.0.0.1:8080");
        assert_eq!(config.admin_api.addr, "127.0.0.1:8787");
    }

    #[test]
    fn parses_a_full_config() {
        let yaml = r#"
listen:
  addr: "127.0.0.1:9090"
admin_api:
  addr: "127.0.0.1:9091"
intercept_enabled: true
scope:
  in: ["example\\.com"]
  out: []
rules:
  - id: 1
    name: "skip static assets"
    operator: and
    match_type: file_extension
    relationship: matches
    pattern: "\\.(png|css|js)$"
    enabled: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.listen.addr, "127.0.0.1:9090");
        assert!(config.intercept_enabled);
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].name, "skip static assets");
    }

    #[test]
    fn rejects_invalid_listen_addr() {
        let mut config = Config::default();
        config.listen.addr = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_invalid_rule_pattern() {
        let mut config = Config::default();
        config.rules.push(InterceptRule {
            id: 1,
            name: "bad".into(),
            operator: crate::store::models::RuleOperator::And,
            match_type: crate::store::models::MatchType::Domain,
            relationship: crate::store::models::Relationship::Matches,
            pattern: "(unclosed".into(),
            enabled: true,
        });
        assert!(config.validate().is_err());
    }
}
