use std::sync::{
    Arc,
    atomic::{AtomicU8, AtomicU64, Ordering},
};

use super::{BreakerState, DegradeRule, DegradeStrategy, ObserverRegistry};
use crate::{
    error::RuleError,
    internal_event::{CircuitBreakerTransitioned, CircuitOpenRejected},
    stat::{BucketData, CounterBucket, LeapArray},
};

/// State machine for one degrade rule.
///
/// State lives in a single atomic and every transition is a compare-and-swap from
/// an expected state, so concurrent callers agree on who performed a transition.
/// In particular only one caller wins Open → HalfOpen and becomes the probe.
pub struct CircuitBreaker {
    rule: Arc<DegradeRule>,
    state: AtomicU8,
    next_retry_ms: AtomicU64,
    stat: LeapArray<CounterBucket>,
    observers: Arc<ObserverRegistry>,
    rejected: CircuitOpenRejected,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("resource", &self.rule.resource)
            .field("strategy", &self.rule.strategy)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(rule: DegradeRule, observers: Arc<ObserverRegistry>) -> Result<Self, RuleError> {
        rule.validate()?;
        let window = rule.window()?;
        let rejected = CircuitOpenRejected::register(rule.resource.clone());
        Ok(Self {
            rule: Arc::new(rule),
            state: AtomicU8::new(BreakerState::Closed as u8),
            next_retry_ms: AtomicU64::new(0),
            stat: LeapArray::new(window, CounterBucket::default),
            observers,
            rejected,
        })
    }

    pub fn rule(&self) -> &Arc<DegradeRule> {
        &self.rule
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// When an open breaker next lets a probe through.
    pub fn next_retry_ms(&self) -> u64 {
        self.next_retry_ms.load(Ordering::Acquire)
    }

    /// Failures and total completed calls in the current window.
    pub fn counts(&self, now: u64) -> (u64, u64) {
        self.stat.current_window(now);
        self.stat.values(now).fold((0, 0), |(target, total), slot| {
            (target + slot.value().target(), total + slot.value().total())
        })
    }

    /// Whether a call may go ahead. An open breaker whose retry time has arrived
    /// admits exactly one caller, which becomes the probe.
    pub fn try_pass(&self, now: u64) -> bool {
        match self.state() {
            BreakerState::Closed => true,
            BreakerState::Open => {
                now >= self.next_retry_ms()
                    && self.transition(BreakerState::Open, BreakerState::HalfOpen, None, now)
            }
            BreakerState::HalfOpen => false,
        }
    }

    /// Records a call this breaker rejected.
    pub(crate) fn rejected_event(&self) -> &CircuitOpenRejected {
        &self.rejected
    }

    /// Puts a probe that never ran back to Open with a fresh retry timeout.
    pub fn revert_probe(&self, now: u64) -> bool {
        self.transition(BreakerState::HalfOpen, BreakerState::Open, None, now)
    }

    pub fn on_request_complete(&self, now: u64, rt: u64, error: bool) {
        let failed = match self.rule.strategy {
            DegradeStrategy::SlowRequestRatio => rt >= self.rule.max_allowed_rt_ms,
            DegradeStrategy::ErrorRatio | DegradeStrategy::ErrorCount => error,
        };
        if let Some(slot) = self.stat.current_window(now) {
            slot.value().record(failed);
        }

        match self.state() {
            BreakerState::Open => {}
            BreakerState::HalfOpen => {
                if failed {
                    self.transition(BreakerState::HalfOpen, BreakerState::Open, Some(1.0), now);
                } else if self.transition(BreakerState::HalfOpen, BreakerState::Closed, None, now)
                {
                    self.reset_stat(now);
                }
            }
            BreakerState::Closed => {
                let (target, total) = self.counts(now);
                // Only the ratio strategies need a minimum sample.
                let observed = match self.rule.strategy {
                    DegradeStrategy::ErrorCount => target as f64,
                    _ if total < self.rule.min_request_amount => return,
                    _ => target as f64 / total as f64,
                };
                if observed >= self.rule.threshold {
                    self.transition(BreakerState::Closed, BreakerState::Open, Some(observed), now);
                }
            }
        }
    }

    fn reset_stat(&self, now: u64) {
        for slot in self.stat.values(now) {
            slot.value().reset();
        }
    }

    fn transition(
        &self,
        from: BreakerState,
        to: BreakerState,
        snapshot: Option<f64>,
        now: u64,
    ) -> bool {
        if to == BreakerState::Open && self.state() == from {
            self.next_retry_ms
                .store(now.saturating_add(self.rule.retry_timeout_ms), Ordering::Release);
        }
        let swapped = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped {
            emit!(CircuitBreakerTransitioned {
                resource: &self.rule.resource,
                from,
                to,
                snapshot,
            });
            self.observers.notify(from, to, &self.rule, snapshot);
        }
        swapped
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, thread};

    use parking_lot::Mutex;

    use super::*;

    fn breaker(rule: DegradeRule) -> CircuitBreaker {
        CircuitBreaker::new(rule, Arc::new(ObserverRegistry::default())).unwrap()
    }

    fn error_count(threshold: f64) -> DegradeRule {
        DegradeRule::builder()
            .resource("db")
            .strategy(DegradeStrategy::ErrorCount)
            .threshold(threshold)
            .retry_timeout_ms(10_000)
            .stat_interval_ms(60_000)
            .build()
    }

    #[test]
    fn error_count_opens_then_probes_after_timeout() {
        let breaker = breaker(error_count(4.0));
        let mut now = 1_000_000;
        for _ in 0..3 {
            assert!(breaker.try_pass(now));
            breaker.on_request_complete(now, 5, true);
            now += 100;
        }
        assert_eq!(breaker.state(), BreakerState::Closed);

        // The fourth error reaches the count; no minimum request amount applies.
        assert!(breaker.try_pass(now));
        breaker.on_request_complete(now, 5, true);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.counts(now), (4, 4));
        let opened_at = now;

        assert!(!breaker.try_pass(opened_at + 9_999));
        assert!(breaker.try_pass(opened_at + 10_000));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(!breaker.try_pass(opened_at + 10_001));
    }

    #[test]
    fn probe_outcome_decides_next_state() {
        let breaker = breaker(error_count(1.0));
        let now = 1_000_000;
        for _ in 0..5 {
            breaker.on_request_complete(now, 1, true);
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        // Failing probe: open again with a fresh timeout.
        let retry = now + 10_000;
        assert!(breaker.try_pass(retry));
        breaker.on_request_complete(retry, 1, true);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.next_retry_ms(), retry + 10_000);
        assert!(!breaker.try_pass(retry + 5_000));

        // Succeeding probe: closed with clean counters.
        let retry = retry + 10_000;
        assert!(breaker.try_pass(retry));
        breaker.on_request_complete(retry, 1, false);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.counts(retry), (0, 0));
        assert!(breaker.try_pass(retry));
    }

    #[test]
    fn ratio_strategies_wait_for_enough_requests() {
        let breaker = breaker(
            DegradeRule::builder()
                .resource("db")
                .strategy(DegradeStrategy::ErrorRatio)
                .threshold(0.5)
                .min_request_amount(4)
                .build(),
        );
        let now = 1_000_000;
        breaker.on_request_complete(now, 1, true);
        breaker.on_request_complete(now, 1, true);
        breaker.on_request_complete(now, 1, true);
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.on_request_complete(now, 1, false);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn error_count_ignores_the_minimum_request_amount() {
        let breaker = breaker(
            DegradeRule::builder()
                .resource("db")
                .strategy(DegradeStrategy::ErrorCount)
                .threshold(2.0)
                .min_request_amount(100)
                .build(),
        );
        let now = 1_000_000;
        breaker.on_request_complete(now, 1, true);
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.on_request_complete(now, 1, true);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn slow_calls_are_at_or_above_the_allowed_rt() {
        let breaker = breaker(
            DegradeRule::builder()
                .resource("db")
                .threshold(0.6)
                .max_allowed_rt_ms(200)
                .build(),
        );
        let now = 1_000_000;
        for rt in [200, 200, 10, 10, 199] {
            breaker.on_request_complete(now, rt, false);
        }
        assert_eq!(breaker.counts(now), (2, 5));
        assert_eq!(breaker.state(), BreakerState::Closed);

        breaker.on_request_complete(now, 500, false);
        breaker.on_request_complete(now, 500, false);
        // 4 slow of 7.
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.on_request_complete(now, 500, false);
        // 5 slow of 8.
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn window_expiry_forgets_old_failures() {
        let breaker = breaker(
            DegradeRule::builder()
                .resource("db")
                .strategy(DegradeStrategy::ErrorCount)
                .threshold(5.0)
                .build(),
        );
        for _ in 0..4 {
            breaker.on_request_complete(1_000_000, 1, true);
        }
        breaker.on_request_complete(1_001_000, 1, true);
        assert_eq!(breaker.counts(1_001_000), (1, 1));
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn reverted_probe_reopens() {
        let breaker = breaker(error_count(1.0));
        for _ in 0..5 {
            breaker.on_request_complete(0, 1, true);
        }
        assert!(breaker.try_pass(10_000));
        assert!(breaker.revert_probe(10_000));
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.next_retry_ms(), 20_000);
        assert!(!breaker.revert_probe(10_000));
    }

    #[test]
    fn exactly_one_probe_under_contention() {
        let breaker = Arc::new(breaker(error_count(1.0)));
        for _ in 0..5 {
            breaker.on_request_complete(0, 1, true);
        }
        let admitted = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                let admitted = Arc::clone(&admitted);
                thread::spawn(move || {
                    for _ in 0..100 {
                        if breaker.try_pass(10_000) {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(admitted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn observers_see_every_transition() {
        let observers = Arc::new(ObserverRegistry::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        observers.register(
            "log",
            Arc::new(
                move |from: BreakerState, to: BreakerState, _: &DegradeRule, _: Option<f64>| {
                    sink.lock().push((from, to));
                },
            ),
        );
        let breaker = CircuitBreaker::new(error_count(1.0), observers).unwrap();
        for _ in 0..5 {
            breaker.on_request_complete(0, 1, true);
        }
        breaker.try_pass(10_000);
        breaker.on_request_complete(10_000, 1, false);

        use BreakerState::*;
        assert_eq!(
            *seen.lock(),
            vec![(Closed, Open), (Open, HalfOpen), (HalfOpen, Closed)]
        );
    }
}
