use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::{FlowController, FlowRule};
use crate::{
    config::EngineConfig,
    internal_event::{RuleRejected, RulesLoaded},
};

/// The flow controllers that apply to one resource, plus the origins they name.
#[derive(Debug, Default)]
pub struct ResourceFlowRules {
    controllers: Vec<Arc<FlowController>>,
    named_origins: Vec<String>,
}

impl ResourceFlowRules {
    pub fn controllers(&self) -> &[Arc<FlowController>] {
        &self.controllers
    }

    /// Whether some rule on this resource targets `origin` explicitly.
    pub fn names_origin(&self, origin: &str) -> bool {
        self.named_origins.iter().any(|named| named == origin)
    }
}

/// Holds the active flow rules as an immutable snapshot per load.
///
/// Readers take the current snapshot without locking; a load builds a new map and
/// swaps it in. Controllers whose rule is unchanged are carried over so their
/// shaping state (warm-up tokens, pacing schedule, in-flight permits) survives.
#[derive(Debug)]
pub struct FlowRuleManager {
    rules: ArcSwap<HashMap<String, Arc<ResourceFlowRules>>>,
    load: Mutex<()>,
}

impl Default for FlowRuleManager {
    fn default() -> Self {
        Self {
            rules: ArcSwap::from_pointee(HashMap::new()),
            load: Mutex::new(()),
        }
    }
}

impl FlowRuleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every flow rule. Invalid rules are logged and skipped; the number of
    /// accepted rules is returned.
    pub fn load_rules(&self, rules: Vec<FlowRule>, config: &EngineConfig) -> usize {
        let _guard = self.load.lock();
        let previous = self.rules.load_full();

        // Each previous controller is handed to at most one incoming rule, so
        // identical rules keep separate state.
        let mut candidates: HashMap<&str, Vec<Arc<FlowController>>> = previous
            .iter()
            .map(|(resource, rules)| (resource.as_str(), rules.controllers.clone()))
            .collect();
        let mut controllers: HashMap<String, Vec<Arc<FlowController>>> = HashMap::new();
        let mut rejected = 0;
        for rule in rules {
            let reused = candidates
                .get_mut(rule.resource.as_str())
                .and_then(|existing| {
                    let position = existing.iter().position(|c| **c.rule() == rule)?;
                    Some(existing.remove(position))
                });
            let controller = match reused {
                Some(controller) => controller,
                None => match FlowController::new(rule.clone(), config) {
                    Ok(controller) => Arc::new(controller),
                    Err(error) => {
                        emit!(RuleRejected {
                            kind: "flow",
                            resource: &rule.resource,
                            error: &error,
                        });
                        rejected += 1;
                        continue;
                    }
                },
            };
            controllers
                .entry(rule.resource.clone())
                .or_default()
                .push(controller);
        }

        let accepted = controllers.values().map(Vec::len).sum();
        let snapshot = controllers
            .into_iter()
            .map(|(resource, controllers)| {
                let named_origins = controllers
                    .iter()
                    .filter(|c| c.rule().is_specific_origin())
                    .map(|c| c.rule().limit_app.clone())
                    .collect();
                (
                    resource,
                    Arc::new(ResourceFlowRules {
                        controllers,
                        named_origins,
                    }),
                )
            })
            .collect();
        self.rules.store(Arc::new(snapshot));

        emit!(RulesLoaded {
            kind: "flow",
            accepted,
            rejected,
        });
        accepted
    }

    pub fn rules_for(&self, resource: &str) -> Option<Arc<ResourceFlowRules>> {
        self.rules.load().get(resource).cloned()
    }

    pub fn has_rules(&self, resource: &str) -> bool {
        self.rules.load().contains_key(resource)
    }

    /// Every loaded rule, in no particular order.
    pub fn rules(&self) -> Vec<Arc<FlowRule>> {
        self.rules
            .load()
            .values()
            .flat_map(|r| r.controllers.iter().map(|c| Arc::clone(c.rule())))
            .collect()
    }
}
