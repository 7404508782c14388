//! The statistics tree.
//!
//! ```text
//!             EntranceNode (per context, computed from children)
//!                  │
//!        ┌─────────┴─────────┐
//!   DefaultNode(ctx, a)  DefaultNode(ctx, b)      ◄── one per (context, resource)
//!        │                   │
//!        ▼                   ▼
//!   ClusterNode(a)       ClusterNode(b)           ◄── one per resource, shared
//!        │
//!        └── origin → StatisticNode               ◄── per caller origin, lazy
//! ```
//!
//! Every write to a [`DefaultNode`] is applied to the node itself and forwarded to
//! its [`ClusterNode`], so cluster totals equal the sum over contexts without
//! walking the tree.

mod cluster;
mod cow;
mod default_node;
mod entrance;
mod registry;
mod statistic;

use std::collections::BTreeMap;

pub use cluster::ClusterNode;
pub use cow::{CowList, CowMap};
pub use default_node::DefaultNode;
pub use entrance::EntranceNode;
pub use registry::{NodeRegistry, DEFAULT_CONTEXT_NAME};
pub use statistic::StatisticNode;

use crate::stat::MetricSnapshot;

/// Read and write surface shared by every node kind.
///
/// Most methods delegate to the node's own [`StatisticNode`]; the variants override
/// only where they differ (forwarding writes, or computing reads from children).
pub trait Node: Send + Sync {
    fn statistic(&self) -> &StatisticNode;

    fn pass_qps(&self) -> f64 {
        self.statistic().pass_qps()
    }

    fn block_qps(&self) -> f64 {
        self.statistic().block_qps()
    }

    fn success_qps(&self) -> f64 {
        self.statistic().success_qps()
    }

    fn exception_qps(&self) -> f64 {
        self.statistic().exception_qps()
    }

    fn total_qps(&self) -> f64 {
        self.pass_qps() + self.block_qps()
    }

    fn occupied_pass_qps(&self) -> f64 {
        self.statistic().occupied_pass_qps()
    }

    fn max_success_qps(&self) -> f64 {
        self.statistic().max_success_qps()
    }

    fn avg_rt(&self) -> f64 {
        self.statistic().avg_rt()
    }

    fn min_rt(&self) -> f64 {
        self.statistic().min_rt()
    }

    fn cur_thread_num(&self) -> u64 {
        self.statistic().cur_thread_num()
    }

    fn previous_pass_qps(&self) -> f64 {
        self.statistic().previous_pass_qps()
    }

    fn previous_block_qps(&self) -> f64 {
        self.statistic().previous_block_qps()
    }

    fn total_request(&self) -> u64 {
        self.total_pass() + self.block_request()
    }

    fn total_pass(&self) -> u64 {
        self.statistic().total_pass()
    }

    fn block_request(&self) -> u64 {
        self.statistic().block_request()
    }

    fn total_success(&self) -> u64 {
        self.statistic().total_success()
    }

    fn total_exception(&self) -> u64 {
        self.statistic().total_exception()
    }

    fn add_pass_request(&self, count: u64) {
        self.statistic().add_pass_request(count);
    }

    fn add_rt_and_success(&self, rt: u64, success: u64) {
        self.statistic().add_rt_and_success(rt, success);
    }

    fn increase_block_qps(&self, count: u64) {
        self.statistic().increase_block_qps(count);
    }

    fn increase_exception_qps(&self, count: u64) {
        self.statistic().increase_exception_qps(count);
    }

    fn increase_thread_num(&self) {
        self.statistic().increase_thread_num();
    }

    fn decrease_thread_num(&self) {
        self.statistic().decrease_thread_num();
    }

    fn waiting(&self) -> u64 {
        self.statistic().waiting()
    }

    fn add_waiting_request(&self, future_time: u64, acquire: u64) {
        self.statistic().add_waiting_request(future_time, acquire);
    }

    fn add_occupied_pass(&self, acquire: u64) {
        self.statistic().add_occupied_pass(acquire);
    }

    fn try_occupy_next(&self, now: u64, acquire: u64, threshold: f64, occupy_timeout_ms: u64) -> u64 {
        self.statistic()
            .try_occupy_next(now, acquire, threshold, occupy_timeout_ms)
    }

    fn metrics(&self) -> BTreeMap<u64, MetricSnapshot> {
        self.statistic().metrics()
    }
}

impl Node for StatisticNode {
    fn statistic(&self) -> &StatisticNode {
        self
    }
}
