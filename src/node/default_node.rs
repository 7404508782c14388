use std::sync::Arc;

use super::{ClusterNode, CowList, Node, StatisticNode};

/// Statistics of one resource as reached from one context.
///
/// Counter updates land here and on the shared [`ClusterNode`]; occupation
/// bookkeeping stays local because it is always applied to the node a rule
/// was evaluated against.
#[derive(Debug)]
pub struct DefaultNode {
    resource: String,
    context: String,
    stat: StatisticNode,
    cluster: Arc<ClusterNode>,
    children: CowList<DefaultNode>,
}

impl DefaultNode {
    pub fn new(
        resource: impl Into<String>,
        context: impl Into<String>,
        stat: StatisticNode,
        cluster: Arc<ClusterNode>,
    ) -> Self {
        Self {
            resource: resource.into(),
            context: context.into(),
            stat,
            cluster,
            children: CowList::default(),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn cluster_node(&self) -> &Arc<ClusterNode> {
        &self.cluster
    }

    pub fn add_child(&self, child: Arc<DefaultNode>) -> bool {
        self.children.insert(child)
    }

    pub fn children(&self) -> Arc<Vec<Arc<DefaultNode>>> {
        self.children.snapshot()
    }
}

impl Node for DefaultNode {
    fn statistic(&self) -> &StatisticNode {
        &self.stat
    }

    fn add_pass_request(&self, count: u64) {
        self.stat.add_pass_request(count);
        self.cluster.add_pass_request(count);
    }

    fn add_rt_and_success(&self, rt: u64, success: u64) {
        self.stat.add_rt_and_success(rt, success);
        self.cluster.add_rt_and_success(rt, success);
    }

    fn increase_block_qps(&self, count: u64) {
        self.stat.increase_block_qps(count);
        self.cluster.increase_block_qps(count);
    }

    fn increase_exception_qps(&self, count: u64) {
        self.stat.increase_exception_qps(count);
        self.cluster.increase_exception_qps(count);
    }

    fn increase_thread_num(&self) {
        self.stat.increase_thread_num();
        self.cluster.increase_thread_num();
    }

    fn decrease_thread_num(&self) {
        self.stat.decrease_thread_num();
        self.cluster.decrease_thread_num();
    }
}
