use std::sync::Arc;

use super::{CowList, DefaultNode, Node, StatisticNode};

/// Root of one context's tree. Its readable metrics are computed from the live
/// children at read time; nothing is stored for them.
#[derive(Debug)]
pub struct EntranceNode {
    context: String,
    stat: StatisticNode,
    children: CowList<DefaultNode>,
}

impl EntranceNode {
    pub fn new(context: impl Into<String>, stat: StatisticNode) -> Self {
        Self {
            context: context.into(),
            stat,
            children: CowList::default(),
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn add_child(&self, child: Arc<DefaultNode>) -> bool {
        self.children.insert(child)
    }

    pub fn children(&self) -> Arc<Vec<Arc<DefaultNode>>> {
        self.children.snapshot()
    }

    fn sum_f64(&self, read: impl Fn(&DefaultNode) -> f64) -> f64 {
        self.children.snapshot().iter().map(|c| read(&**c)).sum()
    }

    fn sum_u64(&self, read: impl Fn(&DefaultNode) -> u64) -> u64 {
        self.children.snapshot().iter().map(|c| read(&**c)).sum()
    }
}

impl Node for EntranceNode {
    fn statistic(&self) -> &StatisticNode {
        &self.stat
    }

    fn pass_qps(&self) -> f64 {
        self.sum_f64(|c| c.pass_qps())
    }

    fn block_qps(&self) -> f64 {
        self.sum_f64(|c| c.block_qps())
    }

    fn success_qps(&self) -> f64 {
        self.sum_f64(|c| c.success_qps())
    }

    fn exception_qps(&self) -> f64 {
        self.sum_f64(|c| c.exception_qps())
    }

    fn total_qps(&self) -> f64 {
        self.sum_f64(|c| c.total_qps())
    }

    fn occupied_pass_qps(&self) -> f64 {
        self.sum_f64(|c| c.occupied_pass_qps())
    }

    /// Response time averaged over children, weighted by each child's success rate.
    fn avg_rt(&self) -> f64 {
        let children = self.children.snapshot();
        let (weighted, successes) =
            children
                .iter()
                .fold((0.0, 0.0), |(weighted, successes), child| {
                    let qps = child.success_qps();
                    (weighted + child.avg_rt() * qps, successes + qps)
                });
        if successes == 0.0 {
            0.0
        } else {
            weighted / successes
        }
    }

    fn min_rt(&self) -> f64 {
        self.children
            .snapshot()
            .iter()
            .map(|c| c.min_rt())
            .reduce(f64::min)
            .unwrap_or_else(|| self.stat.min_rt())
    }

    fn cur_thread_num(&self) -> u64 {
        self.sum_u64(|c| c.cur_thread_num())
    }

    fn total_pass(&self) -> u64 {
        self.sum_u64(|c| c.total_pass())
    }

    fn block_request(&self) -> u64 {
        self.sum_u64(|c| c.block_request())
    }

    fn total_success(&self) -> u64 {
        self.sum_u64(|c| c.total_success())
    }

    fn total_exception(&self) -> u64 {
        self.sum_u64(|c| c.total_exception())
    }
}
