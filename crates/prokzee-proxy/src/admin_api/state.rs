//! Shared handles every Admin API handler needs, plus the Fuzz Driver's
//! single-running-tab guard ("at most one running tab at a time").

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use tokio::sync::oneshot;

use crate::broker::ApprovalBroker;
use crate::ca::CaManager;
use crate::events::EventBus;
use crate::fuzz::FuzzDriver;
use crate::matchreplace::MatchReplaceEngine;
use crate::oob::OobManager;
use crate::replay::ReplayDriver;
use crate::rules::RuleEngine;
use crate::scope::ScopeFilter;
use crate::store::Store;

/// Per-tab cancel handles for in-flight replay sends: `cancel(tab_id)`
/// fires the registered oneshot so the waiting `send` handler's `select!`
/// resolves to the cancellation branch instead of the upstream response.
#[derive(Default)]
pub struct ReplayRegistry {
    cancels: Mutex<std::collections::HashMap<i64, oneshot::Sender<()>>>,
}

impl ReplayRegistry {
    pub fn register(&self, tab_id: i64) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.cancels.lock().insert(tab_id, tx);
        rx
    }

    pub fn clear(&self, tab_id: i64) {
        self.cancels.lock().remove(&tab_id);
    }

    /// Fire `tab_id`'s cancel handle, if an in-flight send is registered.
    /// Returns `false` if there is nothing in flight for that tab.
    pub fn cancel(&self, tab_id: i64) -> bool {
        match self.cancels.lock().remove(&tab_id) {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }
}

/// Per-tab stop flags for in-flight fuzz runs, plus the set of tabs
/// currently running. Only one tab may run at a time; a second
/// `POST /fuzz/{tab_id}/start` while another tab is running is rejected.
#[derive(Default)]
pub struct FuzzRegistry {
    running: Mutex<HashSet<i64>>,
    stop_flags: Mutex<std::collections::HashMap<i64, Arc<AtomicBool>>>,
}

impl FuzzRegistry {
    /// Reserve `tab_id` for a run, returning its stop flag on success or
    /// `None` if a (different, or the same) tab is already running.
    pub fn try_start(&self, tab_id: i64) -> Option<Arc<AtomicBool>> {
        let mut running = self.running.lock();
        if !running.is_empty() {
            return None;
        }
        running.insert(tab_id);
        let flag = Arc::new(AtomicBool::new(false));
        self.stop_flags.lock().insert(tab_id, flag.clone());
        Some(flag)
    }

    pub fn finish(&self, tab_id: i64) {
        self.running.lock().remove(&tab_id);
        self.stop_flags.lock().remove(&tab_id);
    }

    /// Signal a running tab to stop at its next iteration. Returns `false`
    /// if `tab_id` isn't currently running.
    pub fn request_stop(&self, tab_id: i64) -> bool {
        match self.stop_flags.lock().get(&tab_id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, tab_id: i64) -> bool {
        self.running.lock().contains(&tab_id)
    }
}

/// Everything the Admin API's handlers need, cloned cheaply (all `Arc`)
/// into every connection's routing closure.
#[derive(Clone)]
pub struct AppState {
    pub ca: Arc<CaManager>,
    pub scope: Arc<ScopeFilter>,
    pub rules: Arc<RuleEngine>,
    pub match_replace: Arc<MatchReplaceEngine>,
    pub broker: Arc<ApprovalBroker>,
    pub store: Arc<Store>,
    pub bus: Arc<EventBus>,
    pub intercept_enabled: Arc<AtomicBool>,
    pub replay: Arc<ReplayDriver>,
    pub replay_registry: Arc<ReplayRegistry>,
    pub fuzz: Arc<FuzzDriver>,
    pub fuzz_registry: Arc<FuzzRegistry>,
    pub oob: Arc<OobManager>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_start_rejects_a_second_concurrent_tab() {
        let registry = FuzzRegistry::default();
        assert!(registry.try_start(1).is_some());
        assert!(registry.try_start(2).is_none());
        registry.finish(1);
        assert!(registry.try_start(2).is_some());
    }

    #[test]
    fn request_stop_sets_the_flag_for_a_running_tab() {
        let registry = FuzzRegistry::default();
        let flag = registry.try_start(1).unwrap();
        assert!(registry.request_stop(1));
        assert!(flag.load(Ordering::Relaxed));
        assert!(!registry.request_stop(99));
    }
}
