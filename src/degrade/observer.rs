use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::{BreakerState, DegradeRule};
use crate::internal_event::StateObserverPanicked;

/// Notified synchronously on every breaker transition.
///
/// Observers run on the caller's thread while the transition completes, so they
/// should only record or log. A panicking observer is caught and skipped.
pub trait StateChangeObserver: Send + Sync {
    fn on_state_change(
        &self,
        from: BreakerState,
        to: BreakerState,
        rule: &DegradeRule,
        snapshot: Option<f64>,
    );
}

impl<F> StateChangeObserver for F
where
    F: Fn(BreakerState, BreakerState, &DegradeRule, Option<f64>) + Send + Sync,
{
    fn on_state_change(
        &self,
        from: BreakerState,
        to: BreakerState,
        rule: &DegradeRule,
        snapshot: Option<f64>,
    ) {
        self(from, to, rule, snapshot)
    }
}

type Named = (String, Arc<dyn StateChangeObserver>);

/// Observers keyed by name. Registering a name again replaces the earlier observer.
pub struct ObserverRegistry {
    observers: ArcSwap<Vec<Named>>,
    write: Mutex<()>,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self
            .observers
            .load()
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        f.debug_struct("ObserverRegistry")
            .field("observers", &names)
            .finish()
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self {
            observers: ArcSwap::from_pointee(Vec::new()),
            write: Mutex::new(()),
        }
    }
}

impl ObserverRegistry {
    pub fn register(&self, name: impl Into<String>, observer: Arc<dyn StateChangeObserver>) {
        let name = name.into();
        let _guard = self.write.lock();
        let mut next: Vec<Named> = self
            .observers
            .load()
            .iter()
            .filter(|(existing, _)| *existing != name)
            .cloned()
            .collect();
        next.push((name, observer));
        self.observers.store(Arc::new(next));
    }

    pub fn unregister(&self, name: &str) -> bool {
        let _guard = self.write.lock();
        let current = self.observers.load_full();
        let next: Vec<Named> = current
            .iter()
            .filter(|(existing, _)| existing != name)
            .cloned()
            .collect();
        let removed = next.len() != current.len();
        self.observers.store(Arc::new(next));
        removed
    }

    pub fn len(&self) -> usize {
        self.observers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn notify(
        &self,
        from: BreakerState,
        to: BreakerState,
        rule: &DegradeRule,
        snapshot: Option<f64>,
    ) {
        for (name, observer) in self.observers.load().iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                observer.on_state_change(from, to, rule, snapshot)
            }));
            if outcome.is_err() {
                emit!(StateObserverPanicked {
                    observer: name,
                    resource: &rule.resource,
                });
            }
        }
    }
}
