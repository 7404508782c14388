use super::{
    TokenResult,
    throttling::Pacer,
    warm_up::WarmUpCurve,
};
use crate::node::Node;

/// Queueing rate limiter whose rate follows the warm-up ramp instead of the static
/// threshold.
#[derive(Debug)]
pub struct WarmUpThrottlingController {
    curve: WarmUpCurve,
    stat_interval_ms: u64,
    pacer: Pacer,
}

impl WarmUpThrottlingController {
    pub fn new(
        count: f64,
        warm_up_period_sec: u32,
        cold_factor: u32,
        max_queueing_time_ms: u64,
        stat_interval_ms: u64,
    ) -> Self {
        Self {
            curve: WarmUpCurve::new(count, warm_up_period_sec, cold_factor),
            stat_interval_ms,
            pacer: Pacer::new(max_queueing_time_ms),
        }
    }

    pub fn can_pass(&self, node: &dyn Node, acquire: u64, now: u64) -> TokenResult {
        if acquire == 0 {
            return TokenResult::Pass;
        }
        if self.curve.count() <= 0.0 {
            return TokenResult::Blocked;
        }
        self.curve.sync(now, node.previous_pass_qps() as u64);

        let rate = self
            .curve
            .warming_qps(self.curve.stored_tokens())
            .unwrap_or(self.curve.count());
        let cost = (acquire as f64 / rate * self.stat_interval_ms as f64).round() as i64;
        self.pacer.acquire(now, cost)
    }
}
