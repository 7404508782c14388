//! Cold-start ramp after the token-bucket warm-up scheme popularized by Guava's
//! `SmoothWarmingUp`.
//!
//! ```text
//!          rate
//!  count   ┤              ┌───────────
//!          │             ╱
//!          │           ╱   slope
//!          │         ╱
//!  count/  ┤───────╯
//!  cold    │
//!          └───────┬──────┬─────────── stored tokens
//!               warning  max
//! ```
//!
//! Idle time refills stored tokens up to `max_token`. While the bucket holds more
//! than `warning_token` the allowed rate is interpolated along the slope, so a cold
//! resource starts near `count / cold_factor` and reaches `count` as sustained
//! traffic drains the bucket.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use super::TokenResult;
use crate::node::Node;

#[derive(Debug)]
pub(crate) struct WarmUpCurve {
    count: f64,
    cold_factor: u32,
    warning_token: i64,
    max_token: i64,
    slope: f64,
    stored_tokens: AtomicI64,
    last_filled: AtomicU64,
}

impl WarmUpCurve {
    pub(crate) fn new(count: f64, warm_up_period_sec: u32, cold_factor: u32) -> Self {
        let cold = f64::from(cold_factor);
        let warm_up = f64::from(warm_up_period_sec);
        let warning_token = (warm_up * count) as i64 / (i64::from(cold_factor) - 1).max(1);
        let max_token = warning_token + (2.0 * warm_up * count / (1.0 + cold)) as i64;
        let slope = (cold - 1.0) / count / (max_token - warning_token).max(1) as f64;
        Self {
            count,
            cold_factor,
            warning_token,
            max_token,
            slope,
            stored_tokens: AtomicI64::new(0),
            last_filled: AtomicU64::new(0),
        }
    }

    pub(crate) fn count(&self) -> f64 {
        self.count
    }

    pub(crate) fn stored_tokens(&self) -> i64 {
        self.stored_tokens.load(Ordering::Acquire)
    }

    /// The rate currently allowed, or `None` once the bucket is drained below the
    /// warning line and the full `count` applies.
    pub(crate) fn warming_qps(&self, stored: i64) -> Option<f64> {
        (stored >= self.warning_token).then(|| {
            let above = (stored - self.warning_token) as f64;
            1.0 / (above * self.slope + 1.0 / self.count)
        })
    }

    /// Refills once per second from idle time and drains by last second's passes.
    pub(crate) fn sync(&self, now: u64, previous_pass_qps: u64) {
        let current = now - now % 1000;
        let last_filled = self.last_filled.load(Ordering::Acquire);
        if current <= last_filled {
            return;
        }

        let old = self.stored_tokens.load(Ordering::Acquire);
        let refilled = self.cool_down(current, last_filled, old, previous_pass_qps);
        if self
            .stored_tokens
            .compare_exchange(old, refilled, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let drained = i64::try_from(previous_pass_qps).unwrap_or(i64::MAX);
            let rest = self.stored_tokens.fetch_sub(drained, Ordering::AcqRel) - drained;
            if rest < 0 {
                self.stored_tokens.store(0, Ordering::Release);
            }
            self.last_filled.store(current, Ordering::Release);
        }
    }

    fn cool_down(&self, current: u64, last_filled: u64, old: i64, previous_pass_qps: u64) -> i64 {
        let refill = || {
            let idle_tokens = (current - last_filled) as f64 * self.count / 1000.0;
            old.saturating_add(idle_tokens as i64)
        };
        let refilled = if old < self.warning_token {
            refill()
        } else if old > self.warning_token
            && previous_pass_qps < (self.count as u64) / u64::from(self.cold_factor)
        {
            refill()
        } else {
            old
        };
        refilled.min(self.max_token)
    }
}

/// Direct rejection against the warm-up ramp.
#[derive(Debug)]
pub struct WarmUpController {
    curve: WarmUpCurve,
}

impl WarmUpController {
    pub fn new(count: f64, warm_up_period_sec: u32, cold_factor: u32) -> Self {
        Self {
            curve: WarmUpCurve::new(count, warm_up_period_sec, cold_factor),
        }
    }

    pub fn stored_tokens(&self) -> i64 {
        self.curve.stored_tokens()
    }

    pub fn can_pass(&self, node: &dyn Node, acquire: u64, now: u64) -> TokenResult {
        if self.curve.count() <= 0.0 {
            return TokenResult::Blocked;
        }
        let pass_qps = node.pass_qps() as u64;
        self.curve.sync(now, node.previous_pass_qps() as u64);

        let allowed = self
            .curve
            .warming_qps(self.curve.stored_tokens())
            .unwrap_or(self.curve.count());
        if (pass_qps + acquire) as f64 <= allowed {
            TokenResult::Pass
        } else {
            TokenResult::Blocked
        }
    }
}
