use std::time::Duration;

use super::{Grade, TokenResult};
use crate::node::Node;

/// Rejects anything over the threshold, except that prioritized QPS callers may
/// borrow a pass from an upcoming bucket.
#[derive(Debug)]
pub struct DefaultController {
    grade: Grade,
    threshold: f64,
    occupy_timeout_ms: u64,
}

impl DefaultController {
    pub fn new(grade: Grade, threshold: f64, occupy_timeout_ms: u64) -> Self {
        Self {
            grade,
            threshold,
            occupy_timeout_ms,
        }
    }

    fn current(&self, node: &dyn Node) -> u64 {
        match self.grade {
            Grade::Qps => node.pass_qps() as u64,
            Grade::Concurrency => node.cur_thread_num(),
        }
    }

    pub fn can_pass(&self, node: &dyn Node, acquire: u64, prioritized: bool, now: u64) -> TokenResult {
        if (self.current(node) + acquire) as f64 <= self.threshold {
            return TokenResult::Pass;
        }

        if prioritized && self.grade == Grade::Qps {
            let wait = node.try_occupy_next(now, acquire, self.threshold, self.occupy_timeout_ms);
            if wait < self.occupy_timeout_ms {
                node.add_waiting_request(now + wait, acquire);
                node.add_occupied_pass(acquire);
                return TokenResult::Occupied(Duration::from_millis(wait));
            }
        }
        TokenResult::Blocked
    }
}
