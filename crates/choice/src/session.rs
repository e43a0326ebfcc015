//! Shared state behind a chooser: the operation counter, pending rounds,
//! the choice cache and the idle eviction timer.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use arc_swap::ArcSwap;
use kinspect_core::{Choice, Item, Topology};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::ChoiceCache;
use crate::config::ChoiceConfig;

/// Monotonic counter bumped by the application on every user action that
/// should abandon in-flight selection rounds.
#[derive(Debug, Clone, Default)]
pub struct OperationCounter(Arc<AtomicU64>);

impl OperationCounter {
    pub fn new() -> Self { Self::default() }

    pub fn current(&self) -> u64 { self.0.load(Ordering::SeqCst) }

    /// Advance the counter; returns the new value.
    pub fn bump(&self) -> u64 { self.0.fetch_add(1, Ordering::SeqCst) + 1 }

    /// Snapshot for a round about to start.
    pub fn token(&self) -> RoundToken { RoundToken { counter: self.clone(), snapshot: self.current() } }
}

#[derive(Debug, Clone)]
pub struct RoundToken {
    counter: OperationCounter,
    snapshot: u64,
}

impl RoundToken {
    pub fn snapshot(&self) -> u64 { self.snapshot }

    pub fn is_stale(&self) -> bool { self.counter.current() != self.snapshot }
}

#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) cache: ChoiceCache,
    pub(crate) last_cache_key: Option<String>,
    pub(crate) selections: Vec<Choice>,
    pub(crate) pending_pick: Option<oneshot::Sender<Vec<Choice>>>,
}

pub struct SelectionSession {
    config: ChoiceConfig,
    operation: OperationCounter,
    pending: Arc<AtomicUsize>,
    topology: ArcSwap<Topology>,
    state: Arc<Mutex<SessionState>>,
    idle_timer: Mutex<Option<JoinHandle<()>>>,
}

// Guards are never held across an await, so a poisoned lock only means a
// panicking test thread; the data is still consistent.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(|e| e.into_inner()) }

impl SelectionSession {
    pub fn new(config: ChoiceConfig, operation: OperationCounter, topology: Topology) -> Self {
        Self {
            config,
            operation,
            pending: Arc::new(AtomicUsize::new(0)),
            topology: ArcSwap::from_pointee(topology),
            state: Arc::new(Mutex::new(SessionState::default())),
            idle_timer: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ChoiceConfig { &self.config }

    pub fn operation(&self) -> &OperationCounter { &self.operation }

    /// Rounds started but not yet resolved or abandoned.
    pub fn pending(&self) -> usize { self.pending.load(Ordering::SeqCst) }

    pub fn topology(&self) -> Arc<Topology> { self.topology.load_full() }

    pub fn set_topology(&self, topology: Topology) { self.topology.store(Arc::new(topology)); }

    /// Choices stored by the last resolved round.
    pub fn selections(&self) -> Vec<Choice> { lock(&self.state).selections.clone() }

    pub fn cache_is_empty(&self) -> bool { lock(&self.state).cache.is_empty() }

    pub fn cached_items(&self, cache_key: &str, cluster: &str, namespace: &str) -> Option<Vec<Item>> {
        lock(&self.state).cache.get(cache_key, cluster, namespace).map(<[Item]>::to_vec)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SessionState> { lock(&self.state) }

    /// The idle countdown keeps running; only a completed round restarts it.
    pub(crate) fn begin_round(&self) { self.pending.fetch_add(1, Ordering::SeqCst); }

    /// Returns the number of rounds still pending.
    pub(crate) fn end_round(&self) -> usize {
        let prev = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        prev.saturating_sub(1)
    }

    /// Restart the idle eviction timer. Needs a tokio runtime; without one
    /// the cache simply lives until the next key change.
    ///
    /// A timer that expires while a round is in flight waits another idle
    /// period instead of clearing under it.
    pub(crate) fn rearm_idle_timer(&self) {
        let mut slot = lock(&self.idle_timer);
        if let Some(t) = slot.take() { t.abort(); }
        let Ok(handle) = tokio::runtime::Handle::try_current() else { return; };
        let weak: Weak<Mutex<SessionState>> = Arc::downgrade(&self.state);
        let pending = Arc::clone(&self.pending);
        let idle = self.config.idle_eviction;
        *slot = Some(handle.spawn(async move {
            loop {
                tokio::time::sleep(idle).await;
                let Some(state) = weak.upgrade() else { return; };
                if pending.load(Ordering::SeqCst) > 0 {
                    debug!("choice: idle eviction deferred, round in flight");
                    continue;
                }
                let mut st = lock(&state);
                st.cache.clear();
                st.last_cache_key = None;
                debug!(idle_ms = %idle.as_millis(), "choice: idle eviction");
                return;
            }
        }));
    }
}

impl Drop for SelectionSession {
    fn drop(&mut self) {
        if let Some(t) = lock(&self.idle_timer).take() { t.abort(); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_goes_stale_on_bump() {
        let ops = OperationCounter::new();
        let t = ops.token();
        assert!(!t.is_stale());
        assert_eq!(ops.bump(), 1);
        assert!(t.is_stale());
        assert!(!ops.token().is_stale());
    }

    #[test]
    fn end_round_never_underflows() {
        let s = SelectionSession::new(ChoiceConfig::default(), OperationCounter::new(), Topology::default());
        s.begin_round();
        assert_eq!(s.pending(), 1);
        assert_eq!(s.end_round(), 0);
        assert_eq!(s.end_round(), 0);
        assert_eq!(s.pending(), 0);
    }
}
