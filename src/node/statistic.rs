use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
};

use arc_swap::ArcSwap;

use crate::{
    clock::Clock,
    config::WindowSpec,
    stat::{ArrayMetric, MetricEvent, MetricSnapshot},
};

/// The leaf statistics holder: a second-level occupiable window for rates and
/// response times, a minute window for totals, and an in-flight counter.
pub struct StatisticNode {
    clock: Arc<dyn Clock>,
    max_rt: u64,
    second: ArcSwap<ArrayMetric>,
    minute: ArrayMetric,
    threads: AtomicI64,
    last_fetch: AtomicU64,
}

impl std::fmt::Debug for StatisticNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticNode")
            .field("window", &self.second.load().spec())
            .field("threads", &self.threads.load(Ordering::Relaxed))
            .finish()
    }
}

impl StatisticNode {
    pub fn new(clock: Arc<dyn Clock>, window: WindowSpec, max_rt: u64) -> Self {
        Self {
            clock,
            max_rt,
            second: ArcSwap::from_pointee(ArrayMetric::occupiable(window, max_rt)),
            minute: ArrayMetric::new(WindowSpec::minute(), max_rt),
            threads: AtomicI64::new(0),
            last_fetch: AtomicU64::new(0),
        }
    }

    /// A fresh node sharing this node's clock and window shape.
    pub fn sibling(&self) -> Self {
        Self::new(Arc::clone(&self.clock), self.window(), self.max_rt)
    }

    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn window(&self) -> WindowSpec {
        self.second.load().spec()
    }

    /// Replaces the second-level window with an empty one of the given shape.
    pub fn reset(&self, window: WindowSpec) {
        self.second
            .store(Arc::new(ArrayMetric::occupiable(window, self.max_rt)));
    }

    fn second_sum(&self, event: MetricEvent) -> u64 {
        self.second.load().sum(self.now(), event)
    }

    fn per_second(&self, event: MetricEvent) -> f64 {
        let second = self.second.load();
        second.sum(self.now(), event) as f64 / second.spec().interval_sec()
    }

    pub fn pass_qps(&self) -> f64 {
        self.per_second(MetricEvent::Pass)
    }

    pub fn block_qps(&self) -> f64 {
        self.per_second(MetricEvent::Block)
    }

    pub fn success_qps(&self) -> f64 {
        self.per_second(MetricEvent::Success)
    }

    pub fn exception_qps(&self) -> f64 {
        self.per_second(MetricEvent::Exception)
    }

    pub fn occupied_pass_qps(&self) -> f64 {
        self.per_second(MetricEvent::OccupiedPass)
    }

    pub fn total_qps(&self) -> f64 {
        self.pass_qps() + self.block_qps()
    }

    /// Peak success rate: the busiest bucket scaled to a per-second figure.
    pub fn max_success_qps(&self) -> f64 {
        let second = self.second.load();
        let spec = second.spec();
        second.max_success(self.now()) as f64 * f64::from(spec.sample_count())
            / spec.interval_sec()
    }

    pub fn avg_rt(&self) -> f64 {
        let success = self.second_sum(MetricEvent::Success);
        if success == 0 {
            return 0.0;
        }
        self.second_sum(MetricEvent::Rt) as f64 / success as f64
    }

    pub fn min_rt(&self) -> f64 {
        self.second.load().min_rt(self.now()) as f64
    }

    pub fn cur_thread_num(&self) -> u64 {
        self.threads.load(Ordering::Acquire).max(0) as u64
    }

    pub fn previous_pass_qps(&self) -> f64 {
        self.minute.previous_window(self.now(), MetricEvent::Pass) as f64
    }

    pub fn previous_block_qps(&self) -> f64 {
        self.minute.previous_window(self.now(), MetricEvent::Block) as f64
    }

    pub fn total_pass(&self) -> u64 {
        self.minute.sum(self.now(), MetricEvent::Pass)
    }

    pub fn block_request(&self) -> u64 {
        self.minute.sum(self.now(), MetricEvent::Block)
    }

    pub fn total_request(&self) -> u64 {
        self.total_pass() + self.block_request()
    }

    pub fn total_success(&self) -> u64 {
        self.minute.sum(self.now(), MetricEvent::Success)
    }

    pub fn total_exception(&self) -> u64 {
        self.minute.sum(self.now(), MetricEvent::Exception)
    }

    pub fn add_pass_request(&self, count: u64) {
        let now = self.now();
        self.second.load().add(now, MetricEvent::Pass, count);
        self.minute.add(now, MetricEvent::Pass, count);
    }

    pub fn add_rt_and_success(&self, rt: u64, success: u64) {
        let now = self.now();
        let rt = rt.min(self.max_rt);
        let second = self.second.load();
        second.add(now, MetricEvent::Success, success);
        second.add_rt(now, rt);
        self.minute.add(now, MetricEvent::Success, success);
        self.minute.add_rt(now, rt);
    }

    pub fn increase_block_qps(&self, count: u64) {
        let now = self.now();
        self.second.load().add(now, MetricEvent::Block, count);
        self.minute.add(now, MetricEvent::Block, count);
    }

    pub fn increase_exception_qps(&self, count: u64) {
        let now = self.now();
        self.second.load().add(now, MetricEvent::Exception, count);
        self.minute.add(now, MetricEvent::Exception, count);
    }

    pub fn increase_thread_num(&self) {
        self.threads.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decrease_thread_num(&self) {
        self.threads.fetch_sub(1, Ordering::AcqRel);
    }

    /// Passes already booked into upcoming buckets.
    pub fn waiting(&self) -> u64 {
        self.second.load().waiting(self.now())
    }

    pub fn add_waiting_request(&self, future_time: u64, acquire: u64) {
        self.second.load().add_waiting(future_time, acquire);
    }

    pub fn add_occupied_pass(&self, acquire: u64) {
        let now = self.now();
        self.minute.add(now, MetricEvent::OccupiedPass, acquire);
        self.minute.add(now, MetricEvent::Pass, acquire);
    }

    /// How long a prioritized caller must wait before `acquire` tokens fit under
    /// `threshold`, borrowing from the bucket that next leaves the window.
    ///
    /// A result `>= occupy_timeout_ms` means no bucket within the timeout frees
    /// enough room.
    pub fn try_occupy_next(
        &self,
        now: u64,
        acquire: u64,
        threshold: f64,
        occupy_timeout_ms: u64,
    ) -> u64 {
        let second = self.second.load();
        let spec = second.spec();
        let max_count = threshold * spec.interval_sec();
        let borrowed = second.waiting(now);
        if borrowed as f64 >= max_count {
            return occupy_timeout_ms;
        }

        let bucket_length = spec.bucket_length_ms();
        let mut earliest =
            (now - now % bucket_length + bucket_length).saturating_sub(spec.interval_ms());
        let mut current_pass = second.sum(now, MetricEvent::Pass);
        let mut idx = 0;
        while earliest < now {
            let wait = idx * bucket_length + bucket_length - now % bucket_length;
            if wait >= occupy_timeout_ms {
                break;
            }
            let window_pass = second.window_pass(earliest);
            let projected = (current_pass + borrowed + acquire).saturating_sub(window_pass);
            if projected as f64 <= max_count {
                return wait;
            }
            earliest += bucket_length;
            current_pass = current_pass.saturating_sub(window_pass);
            idx += 1;
        }
        occupy_timeout_ms
    }

    /// Completed seconds not handed out by a previous call, keyed by second start.
    ///
    /// The still-filling current second is never included.
    pub fn metrics(&self) -> BTreeMap<u64, MetricSnapshot> {
        let now = self.now();
        let current_second = now - now % 1000;
        let last_fetch = self.last_fetch.load(Ordering::Acquire);
        let concurrency = self.cur_thread_num();

        let metrics: BTreeMap<_, _> = self
            .minute
            .details(now)
            .into_iter()
            .filter(|snapshot| {
                snapshot.timestamp > last_fetch
                    && snapshot.timestamp < current_second
                    && snapshot.is_active()
            })
            .map(|mut snapshot| {
                snapshot.concurrency = concurrency;
                (snapshot.timestamp, snapshot)
            })
            .collect();

        if let Some(newest) = metrics.keys().next_back() {
            self.last_fetch.fetch_max(*newest, Ordering::AcqRel);
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn node(clock: &Arc<ManualClock>) -> StatisticNode {
        StatisticNode::new(
            Arc::clone(clock) as Arc<dyn Clock>,
            WindowSpec::new(2, 1000).unwrap(),
            5000,
        )
    }

    #[test]
    fn qps_and_totals() {
        let clock = Arc::new(ManualClock::new(100_000));
        let node = node(&clock);

        node.add_pass_request(3);
        node.increase_block_qps(2);
        node.add_rt_and_success(40, 1);
        node.add_rt_and_success(20, 1);
        node.increase_exception_qps(1);

        assert_eq!(node.pass_qps(), 3.0);
        assert_eq!(node.block_qps(), 2.0);
        assert_eq!(node.total_qps(), 5.0);
        assert_eq!(node.avg_rt(), 30.0);
        assert_eq!(node.min_rt(), 20.0);
        assert_eq!(node.exception_qps(), 1.0);
        assert_eq!(node.total_request(), 5);

        clock.advance(1_000);
        assert_eq!(node.pass_qps(), 0.0);
        assert_eq!(node.total_pass(), 3);
        assert_eq!(node.previous_pass_qps(), 3.0);
    }

    #[test]
    fn avg_rt_is_zero_without_successes() {
        let clock = Arc::new(ManualClock::new(100_000));
        let node = node(&clock);
        node.add_pass_request(1);
        assert_eq!(node.avg_rt(), 0.0);
    }

    #[test]
    fn rt_is_clamped_to_statistic_max() {
        let clock = Arc::new(ManualClock::new(100_000));
        let node = node(&clock);
        node.add_rt_and_success(60_000, 1);
        assert_eq!(node.avg_rt(), 5000.0);
    }

    #[test]
    fn thread_count_never_goes_negative() {
        let clock = Arc::new(ManualClock::new(0));
        let node = node(&clock);
        node.increase_thread_num();
        node.decrease_thread_num();
        node.decrease_thread_num();
        assert_eq!(node.cur_thread_num(), 0);
    }

    #[test]
    fn occupy_waits_for_the_oldest_bucket_to_leave() {
        let clock = Arc::new(ManualClock::new(10_000));
        let node = node(&clock);
        node.add_pass_request(10);
        clock.set(10_700);

        // The 10 passes sit in the [10_000, 10_500) bucket, which drops out at 11_000.
        assert_eq!(node.try_occupy_next(10_700, 1, 10.0, 500), 300);
        // Too far out for the timeout.
        assert_eq!(node.try_occupy_next(10_700, 1, 10.0, 200), 200);
    }

    #[test]
    fn occupy_fails_once_borrowing_reaches_the_threshold() {
        let clock = Arc::new(ManualClock::new(10_000));
        let node = node(&clock);
        node.add_waiting_request(10_600, 10);
        assert_eq!(node.try_occupy_next(10_100, 1, 10.0, 500), 500);
    }

    #[test]
    fn metrics_skip_the_current_second_and_are_fetched_once() {
        let clock = Arc::new(ManualClock::new(100_000));
        let node = node(&clock);
        node.add_pass_request(2);
        clock.set(101_200);
        node.increase_block_qps(1);

        let first = node.metrics();
        assert_eq!(first.keys().copied().collect::<Vec<_>>(), vec![100_000]);
        assert_eq!(first[&100_000].pass, 2);

        clock.set(102_100);
        let second = node.metrics();
        assert_eq!(second.keys().copied().collect::<Vec<_>>(), vec![101_000]);
        assert_eq!(second[&101_000].block, 1);
    }

    #[test]
    fn reset_swaps_in_an_empty_window() {
        let clock = Arc::new(ManualClock::new(100_000));
        let node = node(&clock);
        node.add_pass_request(5);
        node.reset(WindowSpec::new(4, 1000).unwrap());
        assert_eq!(node.pass_qps(), 0.0);
        assert_eq!(node.window().sample_count(), 4);
        assert_eq!(node.total_pass(), 5);
    }
}
