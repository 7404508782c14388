use std::sync::Arc;

use super::{FlowRule, LIMIT_APP_DEFAULT, LIMIT_APP_OTHER, Strategy};
use crate::node::{DefaultNode, Node, NodeRegistry, StatisticNode};

/// Who is calling and through which node, as seen by rule targeting.
#[derive(Clone, Copy, Debug)]
pub struct CallerContext<'a> {
    pub context: &'a str,
    pub origin: &'a str,
    pub node: &'a Arc<DefaultNode>,
    pub origin_node: Option<&'a Arc<StatisticNode>>,
}

impl CallerContext<'_> {
    fn origin_node(&self) -> Option<Arc<dyn Node>> {
        self.origin_node
            .map(|node| Arc::clone(node) as Arc<dyn Node>)
    }
}

/// Picks the node whose statistics `rule` is checked against, or `None` when the
/// rule does not apply to this call.
///
/// `origin_is_named` tells whether some rule on the resource names the caller's
/// origin explicitly; `"other"` rules step aside for those callers.
pub fn select_node(
    rule: &FlowRule,
    caller: &CallerContext<'_>,
    registry: &NodeRegistry,
    origin_is_named: bool,
) -> Option<Arc<dyn Node>> {
    let limit_app = rule.limit_app.as_str();
    let origin = caller.origin;

    let direct = if !origin.is_empty()
        && limit_app == origin
        && origin != LIMIT_APP_DEFAULT
        && origin != LIMIT_APP_OTHER
    {
        caller.origin_node()
    } else if limit_app == LIMIT_APP_DEFAULT {
        Some(Arc::clone(caller.node.cluster_node()) as Arc<dyn Node>)
    } else if limit_app == LIMIT_APP_OTHER && !origin.is_empty() && !origin_is_named {
        caller.origin_node()
    } else {
        return None;
    };

    match rule.strategy {
        Strategy::Direct => direct,
        Strategy::Relate => {
            let reference = rule.ref_resource.as_deref()?;
            registry
                .cluster_node(reference)
                .map(|node| node as Arc<dyn Node>)
        }
        Strategy::Chain => {
            let reference = rule.ref_resource.as_deref()?;
            (reference == caller.context).then(|| Arc::clone(caller.node) as Arc<dyn Node>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, config::WindowSpec};

    fn registry() -> NodeRegistry {
        NodeRegistry::new(
            Arc::new(ManualClock::new(10_000)),
            WindowSpec::new(2, 1000).unwrap(),
            5000,
        )
    }

    fn rule(limit_app: &str) -> FlowRule {
        FlowRule::builder()
            .resource("res")
            .threshold(1.0)
            .limit_app(limit_app)
            .build()
    }

    fn same(a: &Arc<dyn Node>, b: &dyn Node) -> bool {
        std::ptr::eq(a.statistic(), b.statistic())
    }

    #[test]
    fn default_rules_target_the_cluster_node() {
        let registry = registry();
        let node = registry.resolve_node("res", "ctx");
        let caller = CallerContext {
            context: "ctx",
            origin: "",
            node: &node,
            origin_node: None,
        };
        let selected = select_node(&rule("default"), &caller, &registry, false).unwrap();
        assert!(same(&selected, &**node.cluster_node()));
    }

    #[test]
    fn origin_rules_target_the_origin_node() {
        let registry = registry();
        let node = registry.resolve_node("res", "ctx");
        let origin_node = node.cluster_node().get_or_create_origin_node("billing");
        let caller = CallerContext {
            context: "ctx",
            origin: "billing",
            node: &node,
            origin_node: Some(&origin_node),
        };

        let selected = select_node(&rule("billing"), &caller, &registry, true).unwrap();
        assert!(same(&selected, &*origin_node));
        assert!(select_node(&rule("search"), &caller, &registry, true).is_none());

        // "other" steps aside for origins another rule names.
        assert!(select_node(&rule("other"), &caller, &registry, true).is_none());
        let selected = select_node(&rule("other"), &caller, &registry, false).unwrap();
        assert!(same(&selected, &*origin_node));
    }

    #[test]
    fn relate_and_chain_strategies() {
        let registry = registry();
        let node = registry.resolve_node("res", "ctx");
        let other = registry.resolve_node("db", "ctx");
        let caller = CallerContext {
            context: "ctx",
            origin: "",
            node: &node,
            origin_node: None,
        };

        let relate = FlowRule::builder()
            .resource("res")
            .threshold(1.0)
            .strategy(Strategy::Relate)
            .ref_resource("db")
            .build();
        let selected = select_node(&relate, &caller, &registry, false).unwrap();
        assert!(same(&selected, &**other.cluster_node()));

        let chain = |context: &str| {
            FlowRule::builder()
                .resource("res")
                .threshold(1.0)
                .strategy(Strategy::Chain)
                .ref_resource(context)
                .build()
        };
        let selected = select_node(&chain("ctx"), &caller, &registry, false).unwrap();
        assert!(same(&selected, &*node));
        assert!(select_node(&chain("elsewhere"), &caller, &registry, false).is_none());
    }
}
