use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;

use super::{ClusterNode, CowMap, DefaultNode, EntranceNode, Node, StatisticNode};
use crate::{clock::Clock, config::WindowSpec};

/// Context used when the caller does not name one.
pub const DEFAULT_CONTEXT_NAME: &str = "flowguard_default_context";

const INBOUND_NODE_NAME: &str = "__total_inbound_traffic__";

/// Owner of every node in one engine.
///
/// Nodes are created on first use and live as long as the registry; the only
/// administrative mutation is [`reconfigure`](Self::reconfigure), which resets
/// second-level statistics when the window shape changes.
pub struct NodeRegistry {
    clock: Arc<dyn Clock>,
    max_rt: u64,
    window: ArcSwap<WindowSpec>,
    clusters: CowMap<String, ClusterNode>,
    entrances: CowMap<String, EntranceNode>,
    defaults: CowMap<String, CowMap<String, DefaultNode>>,
    inbound: Arc<ClusterNode>,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("window", &**self.window.load())
            .field("resources", &self.clusters.len())
            .field("contexts", &self.entrances.len())
            .finish()
    }
}

impl NodeRegistry {
    pub fn new(clock: Arc<dyn Clock>, window: WindowSpec, max_rt: u64) -> Self {
        let inbound = Arc::new(ClusterNode::new(
            INBOUND_NODE_NAME,
            StatisticNode::new(Arc::clone(&clock), window, max_rt),
        ));
        Self {
            clock,
            max_rt,
            window: ArcSwap::from_pointee(window),
            clusters: CowMap::default(),
            entrances: CowMap::default(),
            defaults: CowMap::default(),
            inbound,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn window(&self) -> WindowSpec {
        **self.window.load()
    }

    fn statistic_node(&self) -> StatisticNode {
        StatisticNode::new(Arc::clone(&self.clock), self.window(), self.max_rt)
    }

    /// Aggregate of every inbound entry across resources.
    pub fn inbound_node(&self) -> &Arc<ClusterNode> {
        &self.inbound
    }

    pub fn cluster_node(&self, resource: &str) -> Option<Arc<ClusterNode>> {
        self.clusters.get(resource)
    }

    pub fn get_or_create_cluster_node(&self, resource: &str) -> Arc<ClusterNode> {
        if let Some(node) = self.clusters.get(resource) {
            return node;
        }
        self.clusters.get_or_insert_with(resource.to_owned(), || {
            ClusterNode::new(resource, self.statistic_node())
        })
    }

    pub fn cluster_nodes(&self) -> Arc<HashMap<String, Arc<ClusterNode>>> {
        self.clusters.snapshot()
    }

    pub fn entrance_node(&self, context: &str) -> Arc<EntranceNode> {
        if let Some(node) = self.entrances.get(context) {
            return node;
        }
        self.entrances.get_or_insert_with(context.to_owned(), || {
            EntranceNode::new(context, self.statistic_node())
        })
    }

    pub fn entrance_nodes(&self) -> Arc<HashMap<String, Arc<EntranceNode>>> {
        self.entrances.snapshot()
    }

    /// The node for `resource` under `context`, attached below the context's
    /// entrance node the first time it is seen.
    pub fn resolve_node(&self, resource: &str, context: &str) -> Arc<DefaultNode> {
        self.resolve(resource, context, |node| {
            self.entrance_node(context).add_child(node);
        })
    }

    /// Like [`resolve_node`](Self::resolve_node) but attaches a newly created node
    /// below `parent`, for entries nested inside another entry.
    pub fn resolve_child_node(
        &self,
        resource: &str,
        context: &str,
        parent: &DefaultNode,
    ) -> Arc<DefaultNode> {
        self.resolve(resource, context, |node| {
            parent.add_child(node);
        })
    }

    fn resolve(
        &self,
        resource: &str,
        context: &str,
        attach: impl FnOnce(Arc<DefaultNode>),
    ) -> Arc<DefaultNode> {
        let by_resource = match self.defaults.get(context) {
            Some(map) => map,
            None => self
                .defaults
                .get_or_insert_with(context.to_owned(), CowMap::default),
        };
        if let Some(node) = by_resource.get(resource) {
            return node;
        }

        let mut created = false;
        let node = by_resource.get_or_insert_with(resource.to_owned(), || {
            created = true;
            DefaultNode::new(
                resource,
                context,
                self.statistic_node(),
                self.get_or_create_cluster_node(resource),
            )
        });
        if created {
            attach(Arc::clone(&node));
        }
        node
    }

    /// Switches the second-level window shape. Every existing node starts over with
    /// an empty window; minute totals are kept.
    pub fn reconfigure(&self, window: WindowSpec) {
        self.window.store(Arc::new(window));
        self.inbound.reset(window);
        for cluster in self.clusters.snapshot().values() {
            cluster.reset(window);
        }
        for by_resource in self.defaults.snapshot().values() {
            for node in by_resource.snapshot().values() {
                node.statistic().reset(window);
            }
        }
        info!(
            message = "Statistic window reconfigured.",
            sample_count = window.sample_count(),
            interval_ms = window.interval_ms(),
        );
    }
}
