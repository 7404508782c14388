use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::{CircuitBreaker, DegradeRule, ObserverRegistry, StateChangeObserver};
use crate::internal_event::{RuleRejected, RulesLoaded};

type Breakers = HashMap<String, Arc<Vec<Arc<CircuitBreaker>>>>;

/// Holds one breaker per loaded degrade rule, grouped by resource.
///
/// A reload keeps the breaker, state and counters included, of every rule that is
/// unchanged; breakers of removed or edited rules are dropped.
#[derive(Debug)]
pub struct DegradeRuleManager {
    breakers: ArcSwap<Breakers>,
    observers: Arc<ObserverRegistry>,
    load: Mutex<()>,
}

impl Default for DegradeRuleManager {
    fn default() -> Self {
        Self {
            breakers: ArcSwap::from_pointee(HashMap::new()),
            observers: Arc::new(ObserverRegistry::default()),
            load: Mutex::new(()),
        }
    }
}

impl DegradeRuleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_rules(&self, rules: Vec<DegradeRule>) -> usize {
        let _guard = self.load.lock();
        let previous = self.breakers.load_full();

        let mut candidates: HashMap<&str, Vec<Arc<CircuitBreaker>>> = previous
            .iter()
            .map(|(resource, breakers)| (resource.as_str(), breakers.to_vec()))
            .collect();
        let mut grouped: HashMap<String, Vec<Arc<CircuitBreaker>>> = HashMap::new();
        let mut rejected = 0;
        for rule in rules {
            // One previous breaker per incoming rule, even among identical rules.
            let reused = candidates
                .get_mut(rule.resource.as_str())
                .and_then(|existing| {
                    let position = existing.iter().position(|b| **b.rule() == rule)?;
                    Some(existing.remove(position))
                });
            let breaker = match reused {
                Some(breaker) => breaker,
                None => match CircuitBreaker::new(rule.clone(), Arc::clone(&self.observers)) {
                    Ok(breaker) => Arc::new(breaker),
                    Err(error) => {
                        emit!(RuleRejected {
                            kind: "degrade",
                            resource: &rule.resource,
                            error: &error,
                        });
                        rejected += 1;
                        continue;
                    }
                },
            };
            grouped
                .entry(rule.resource.clone())
                .or_default()
                .push(breaker);
        }

        let accepted = grouped.values().map(Vec::len).sum();
        let snapshot = grouped
            .into_iter()
            .map(|(resource, breakers)| (resource, Arc::new(breakers)))
            .collect();
        self.breakers.store(Arc::new(snapshot));

        emit!(RulesLoaded {
            kind: "degrade",
            accepted,
            rejected,
        });
        accepted
    }

    pub fn breakers_for(&self, resource: &str) -> Option<Arc<Vec<Arc<CircuitBreaker>>>> {
        self.breakers.load().get(resource).cloned()
    }

    pub fn rules(&self) -> Vec<Arc<DegradeRule>> {
        self.breakers
            .load()
            .values()
            .flat_map(|breakers| breakers.iter().map(|b| Arc::clone(b.rule())))
            .collect()
    }

    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    pub fn register_state_observer(
        &self,
        name: impl Into<String>,
        observer: Arc<dyn StateChangeObserver>,
    ) {
        self.observers.register(name, observer);
    }
}
