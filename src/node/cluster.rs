use std::{collections::HashMap, sync::Arc};

use super::{CowMap, Node, StatisticNode};
use crate::config::WindowSpec;

/// Global statistics for one resource across every context, plus lazily created
/// per-origin breakdowns.
#[derive(Debug)]
pub struct ClusterNode {
    name: String,
    stat: StatisticNode,
    origins: CowMap<String, StatisticNode>,
}

impl ClusterNode {
    pub fn new(name: impl Into<String>, stat: StatisticNode) -> Self {
        Self {
            name: name.into(),
            stat,
            origins: CowMap::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The statistics of calls from `origin`, created on first use.
    pub fn get_or_create_origin_node(&self, origin: &str) -> Arc<StatisticNode> {
        if let Some(node) = self.origins.get(origin) {
            return node;
        }
        self.origins
            .get_or_insert_with(origin.to_owned(), || self.stat.sibling())
    }

    pub fn origin_node(&self, origin: &str) -> Option<Arc<StatisticNode>> {
        self.origins.get(origin)
    }

    pub fn origin_nodes(&self) -> Arc<HashMap<String, Arc<StatisticNode>>> {
        self.origins.snapshot()
    }

    /// Drops the second-level statistics of this node and of every origin node.
    pub fn reset(&self, window: WindowSpec) {
        self.stat.reset(window);
        for node in self.origins.snapshot().values() {
            node.reset(window);
        }
    }
}

impl Node for ClusterNode {
    fn statistic(&self) -> &StatisticNode {
        &self.stat
    }
}
