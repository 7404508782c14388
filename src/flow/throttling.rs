use std::sync::atomic::{AtomicI64, Ordering};

use super::TokenResult;

/// Spaces admitted calls evenly: each admission pushes the next allowed pass time
/// forward by the call's cost.
#[derive(Debug)]
pub(crate) struct Pacer {
    max_queueing_time_ms: i64,
    latest_passed: AtomicI64,
}

impl Pacer {
    pub(crate) fn new(max_queueing_time_ms: u64) -> Self {
        Self {
            max_queueing_time_ms: i64::try_from(max_queueing_time_ms).unwrap_or(i64::MAX),
            latest_passed: AtomicI64::new(-1),
        }
    }

    /// Books a pass costing `cost_ms` of the schedule. Reservations that would wait
    /// longer than the queueing budget are rolled back.
    pub(crate) fn acquire(&self, now: u64, cost_ms: i64) -> TokenResult {
        let now = i64::try_from(now).unwrap_or(i64::MAX);
        let expected = self.latest_passed.load(Ordering::Acquire).saturating_add(cost_ms);
        if expected <= now {
            self.latest_passed.store(now, Ordering::Release);
            return TokenResult::Pass;
        }

        if expected - now > self.max_queueing_time_ms {
            return TokenResult::Blocked;
        }

        let booked = self
            .latest_passed
            .fetch_add(cost_ms, Ordering::AcqRel)
            .saturating_add(cost_ms);
        let wait = booked - now;
        if wait > self.max_queueing_time_ms {
            self.latest_passed.fetch_sub(cost_ms, Ordering::AcqRel);
            return TokenResult::Blocked;
        }
        TokenResult::wait_ms(wait.max(0) as u64)
    }
}

/// Rate limiter with queueing: calls over the rate wait for their slot in the
/// schedule instead of failing, as long as the wait fits `max_queueing_time_ms`.
#[derive(Debug)]
pub struct ThrottlingController {
    threshold: f64,
    stat_interval_ms: u64,
    pacer: Pacer,
}

impl ThrottlingController {
    pub fn new(threshold: f64, max_queueing_time_ms: u64, stat_interval_ms: u64) -> Self {
        Self {
            threshold,
            stat_interval_ms,
            pacer: Pacer::new(max_queueing_time_ms),
        }
    }

    pub fn can_pass(&self, acquire: u64, now: u64) -> TokenResult {
        if acquire == 0 {
            return TokenResult::Pass;
        }
        if self.threshold <= 0.0 {
            return TokenResult::Blocked;
        }
        let cost = (self.stat_interval_ms as f64 * acquire as f64 / self.threshold).round() as i64;
        self.pacer.acquire(now, cost)
    }
}
