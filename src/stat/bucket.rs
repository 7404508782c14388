use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept per bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricEvent {
    Pass,
    Block,
    Exception,
    Success,
    /// Summed response time of successful calls.
    Rt,
    /// Passes borrowed from a future window by prioritized callers.
    OccupiedPass,
}

impl MetricEvent {
    pub const ALL: [MetricEvent; 6] = [
        MetricEvent::Pass,
        MetricEvent::Block,
        MetricEvent::Exception,
        MetricEvent::Success,
        MetricEvent::Rt,
        MetricEvent::OccupiedPass,
    ];

    const fn index(self) -> usize {
        self as usize
    }
}

/// Per-slot payload of a [`LeapArray`](super::LeapArray).
///
/// `reset` is only ever called by the thread that won the right to recycle the slot.
pub trait BucketData: Send + Sync {
    fn reset(&self);
}

/// One time slice worth of call statistics.
#[derive(Debug)]
pub struct MetricBucket {
    counters: [AtomicU64; 6],
    min_rt: AtomicU64,
    max_rt: u64,
}

impl MetricBucket {
    /// `max_rt` seeds `min_rt` so an empty bucket never reports a smaller minimum.
    pub fn new(max_rt: u64) -> Self {
        Self {
            counters: Default::default(),
            min_rt: AtomicU64::new(max_rt),
            max_rt,
        }
    }

    pub fn add(&self, event: MetricEvent, n: u64) {
        self.counters[event.index()].fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, event: MetricEvent) -> u64 {
        self.counters[event.index()].load(Ordering::Relaxed)
    }

    pub fn add_rt(&self, rt: u64) {
        self.add(MetricEvent::Rt, rt);
        self.min_rt.fetch_min(rt, Ordering::Relaxed);
    }

    pub fn min_rt(&self) -> u64 {
        self.min_rt.load(Ordering::Relaxed)
    }

    pub fn pass(&self) -> u64 {
        self.get(MetricEvent::Pass)
    }

    pub fn block(&self) -> u64 {
        self.get(MetricEvent::Block)
    }

    pub fn success(&self) -> u64 {
        self.get(MetricEvent::Success)
    }

    pub fn exception(&self) -> u64 {
        self.get(MetricEvent::Exception)
    }

    pub fn rt(&self) -> u64 {
        self.get(MetricEvent::Rt)
    }

    pub fn occupied_pass(&self) -> u64 {
        self.get(MetricEvent::OccupiedPass)
    }
}

impl BucketData for MetricBucket {
    fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
        self.min_rt.store(self.max_rt, Ordering::Relaxed);
    }
}

/// Two-counter bucket used by circuit breakers: `target` counts errors or slow
/// calls, `total` counts every completed call.
#[derive(Debug, Default)]
pub struct CounterBucket {
    target: AtomicU64,
    total: AtomicU64,
}

impl CounterBucket {
    pub fn record(&self, hit: bool) {
        if hit {
            self.target.fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn target(&self) -> u64 {
        self.target.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl BucketData for CounterBucket {
    fn reset(&self) {
        self.target.store(0, Ordering::Relaxed);
        self.total.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_rt_tracks_smallest_value_and_resets() {
        let bucket = MetricBucket::new(5000);
        assert_eq!(bucket.min_rt(), 5000);

        bucket.add_rt(40);
        bucket.add_rt(12);
        bucket.add_rt(90);
        assert_eq!(bucket.min_rt(), 12);
        assert_eq!(bucket.rt(), 142);

        bucket.add(MetricEvent::Pass, 3);
        bucket.reset();
        assert_eq!(bucket.pass(), 0);
        assert_eq!(bucket.rt(), 0);
        assert_eq!(bucket.min_rt(), 5000);
    }

    #[test]
    fn counter_bucket_counts_hits_and_totals() {
        let bucket = CounterBucket::default();
        bucket.record(true);
        bucket.record(false);
        bucket.record(true);
        assert_eq!((bucket.target(), bucket.total()), (2, 3));
        bucket.reset();
        assert_eq!((bucket.target(), bucket.total()), (0, 0));
    }
}
