//! Scope Filter: compiled-regex in/out scope matching.
//!
//! A host is in scope when it matches at least one `in` pattern and no
//! `out` pattern; `out` always wins over `in`. An empty `in` list means
//! "everything is in scope" unless narrowed by `out`. Compiled patterns
//! are cached behind a read-write lock so a scope update doesn't block
//! concurrent reads from in-flight requests any longer than it takes to
//! swap the list.

use parking_lot::RwLock;
use regex::Regex;

use crate::error::StoreError;
use crate::store::models::ScopeList;

struct CompiledScope {
    in_scope: Vec<Regex>,
    out_scope: Vec<Regex>,
}

pub struct ScopeFilter {
    compiled: RwLock<CompiledScope>,
}

impl ScopeFilter {
    pub fn new(scope: &ScopeList) -> Result<Self, StoreError> {
        Ok(Self {
            compiled: RwLock::new(Self::compile(scope)?),
        })
    }

    fn compile(scope: &ScopeList) -> Result<CompiledScope, StoreError> {
        let in_scope = scope
            .in_scope
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        let out_scope = scope
            .out_scope
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CompiledScope { in_scope, out_scope })
    }

    /// Replace the active scope, recompiling every pattern up front so a
    /// bad regex is rejected at update time rather than at match time.
    pub fn update(&self, scope: &ScopeList) -> Result<(), StoreError> {
        let compiled = Self::compile(scope)?;
        *self.compiled.write() = compiled;
        Ok(())
    }

    /// Whether `host` is currently in scope. The CA-download host and the
    /// UI's own loopback name are always out of scope so the proxy
    /// never tries to MITM its own control surfaces.
    pub fn is_in_scope(&self, host: &str) -> bool {
        if host == "prokzee" || host == "wails.localhost" {
            return false;
        }
        let compiled = self.compiled.read();
        if compiled.out_scope.iter().any(|re| re.is_match(host)) {
            return false;
        }
        if compiled.in_scope.is_empty() {
            return true;
        }
        compiled.in_scope.iter().any(|re| re.is_match(host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_scope_admits_everything() {
        let filter = ScopeFilter::new(&ScopeList::default()).unwrap();
        assert!(filter.is_in_scope("anything.example.com"));
    }

    #[test]
    fn out_scope_wins_over_in_scope() {
        let scope = ScopeList {
            in_scope: vec![".*\\.example\\.com".into()],
            out_scope: vec!["static\\.example\\.com".into()],
        };
        let filter = ScopeFilter::new(&scope).unwrap();
        assert!(filter.is_in_scope("api.example.com"));
        assert!(!filter.is_in_scope("static.example.com"));
    }

    #[test]
    fn non_empty_in_scope_excludes_unmatched_hosts() {
        let scope = ScopeList {
            in_scope: vec!["^api\\.example\\.com$".into()],
            out_scope: vec![],
        };
        let filter = ScopeFilter::new(&scope).unwrap();
        assert!(filter.is_in_scope("api.example.com"));
        assert!(!filter.is_in_scope("other.example.com"));
    }

    #[test]
    fn special_hosts_are_always_out_of_scope() {
        let scope = ScopeList {
            in_scope: vec![".*".into()],
            out_scope: vec![],
        };
        let filter = ScopeFilter::new(&scope).unwrap();
        assert!(!filter.is_in_scope("prokzee"));
        assert!(!filter.is_in_scope("wails.localhost"));
    }

    #[test]
    fn update_rejects_invalid_regex_without_losing_the_old_scope() {
        let scope = ScopeList {
            in_scope: vec!["^good$".into()],
            out_scope: vec![],
        };
        let filter = ScopeFilter::new(&scope).unwrap();
        let bad = ScopeList {
            in_scope: vec!["(unclosed".into()],
            out_scope: vec![],
        };
        assert!(filter.update(&bad).is_err());
        assert!(filter.is_in_scope("good"));
    }
}
