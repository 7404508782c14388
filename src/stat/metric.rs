use serde::{Deserialize, Serialize};

use super::{
    bucket::{MetricBucket, MetricEvent},
    leap_array::{LeapArray, Retention, Slot},
};
use crate::config::WindowSpec;

/// One bucket's worth of statistics, as handed to exporters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Start of the bucket, in milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
    pub pass: u64,
    pub block: u64,
    pub success: u64,
    pub exception: u64,
    /// Average response time of the successful calls in this bucket.
    pub rt: u64,
    pub occupied_pass: u64,
    pub concurrency: u64,
}

impl MetricSnapshot {
    fn from_bucket(timestamp: u64, bucket: &MetricBucket) -> Self {
        let success = bucket.success();
        Self {
            timestamp,
            resource: String::new(),
            pass: bucket.pass(),
            block: bucket.block(),
            success,
            exception: bucket.exception(),
            rt: if success == 0 { 0 } else { bucket.rt() / success },
            occupied_pass: bucket.occupied_pass(),
            concurrency: 0,
        }
    }

    /// Whether anything at all happened in this bucket.
    pub fn is_active(&self) -> bool {
        self.pass > 0
            || self.block > 0
            || self.success > 0
            || self.exception > 0
            || self.rt > 0
            || self.occupied_pass > 0
    }
}

/// Metric store over a leap array of [`MetricBucket`]s.
///
/// An occupiable metric keeps a second, future-facing array of borrowed passes.
/// When the main window rotates into a slice that prioritized callers borrowed from,
/// the borrowed count seeds the fresh bucket's pass counter.
#[derive(Debug)]
pub struct ArrayMetric {
    data: LeapArray<MetricBucket>,
    borrowed: Option<LeapArray<MetricBucket>>,
    max_rt: u64,
}

impl ArrayMetric {
    pub fn new(spec: WindowSpec, max_rt: u64) -> Self {
        Self {
            data: LeapArray::new(spec, || MetricBucket::new(max_rt)),
            borrowed: None,
            max_rt,
        }
    }

    pub fn occupiable(spec: WindowSpec, max_rt: u64) -> Self {
        Self {
            data: LeapArray::new(spec, || MetricBucket::new(max_rt)),
            borrowed: Some(LeapArray::with_retention(spec, Retention::Future, || {
                MetricBucket::new(max_rt)
            })),
            max_rt,
        }
    }

    pub const fn spec(&self) -> WindowSpec {
        self.data.spec()
    }

    fn current(&self, now: u64) -> Option<&Slot<MetricBucket>> {
        self.data.current_window_with(now, |bucket, start| {
            let borrowed = self
                .borrowed
                .as_ref()
                .and_then(|borrowed| borrowed.window_at(start));
            if let Some(borrowed) = borrowed {
                bucket.add(MetricEvent::Pass, borrowed.value().pass());
            }
        })
    }

    fn buckets(&self, now: u64) -> impl Iterator<Item = &Slot<MetricBucket>> + '_ {
        self.current(now);
        self.data.values(now)
    }

    pub fn add(&self, now: u64, event: MetricEvent, n: u64) {
        if let Some(slot) = self.current(now) {
            slot.value().add(event, n);
        }
    }

    pub fn add_rt(&self, now: u64, rt: u64) {
        if let Some(slot) = self.current(now) {
            slot.value().add_rt(rt);
        }
    }

    pub fn sum(&self, now: u64, event: MetricEvent) -> u64 {
        self.buckets(now).map(|slot| slot.value().get(event)).sum()
    }

    pub fn min_rt(&self, now: u64) -> u64 {
        self.buckets(now)
            .map(|slot| slot.value().min_rt())
            .fold(self.max_rt, u64::min)
    }

    /// Largest per-bucket success count in the window, never below one.
    pub fn max_success(&self, now: u64) -> u64 {
        self.buckets(now)
            .map(|slot| slot.value().success())
            .fold(1, u64::max)
    }

    pub fn previous_window(&self, now: u64, event: MetricEvent) -> u64 {
        self.current(now);
        self.data
            .previous_window(now)
            .map_or(0, |slot| slot.value().get(event))
    }

    /// Pass count of the bucket covering `time`, if that bucket is still held.
    pub fn window_pass(&self, time: u64) -> u64 {
        self.data
            .window_at(time)
            .map_or(0, |slot| slot.value().pass())
    }

    /// Passes booked into future buckets and not yet rotated in.
    pub fn waiting(&self, now: u64) -> u64 {
        self.borrowed.as_ref().map_or(0, |borrowed| {
            borrowed
                .values(now)
                .map(|slot| slot.value().pass())
                .sum()
        })
    }

    /// Books `n` passes into the future bucket covering `future_time`.
    pub fn add_waiting(&self, future_time: u64, n: u64) {
        let slot = self
            .borrowed
            .as_ref()
            .and_then(|borrowed| borrowed.current_window(future_time));
        if let Some(slot) = slot {
            slot.value().add(MetricEvent::Pass, n);
        }
    }

    /// Per-bucket snapshots of the live window, oldest first.
    pub fn details(&self, now: u64) -> Vec<MetricSnapshot> {
        let mut details: Vec<_> = self
            .buckets(now)
            .map(|slot| MetricSnapshot::from_bucket(slot.start(), slot.value()))
            .collect();
        details.sort_by_key(|snapshot| snapshot.timestamp);
        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn second_window() -> ArrayMetric {
        ArrayMetric::occupiable(WindowSpec::new(2, 1000).unwrap(), 5000)
    }

    #[test]
    fn sums_cover_only_the_live_window() {
        let metric = second_window();
        metric.add(10_000, MetricEvent::Pass, 3);
        metric.add(10_600, MetricEvent::Pass, 2);
        assert_eq!(metric.sum(10_700, MetricEvent::Pass), 5);
        assert_eq!(metric.sum(11_100, MetricEvent::Pass), 2);
        assert_eq!(metric.sum(11_600, MetricEvent::Pass), 0);
    }

    #[test]
    fn min_rt_defaults_to_max_rt() {
        let metric = second_window();
        assert_eq!(metric.min_rt(1_000), 5000);
        metric.add_rt(1_000, 30);
        metric.add_rt(1_600, 10);
        assert_eq!(metric.min_rt(1_700), 10);
    }

    #[test]
    fn max_success_is_at_least_one() {
        let metric = second_window();
        assert_eq!(metric.max_success(1_000), 1);
        metric.add(1_000, MetricEvent::Success, 4);
        metric.add(1_500, MetricEvent::Success, 9);
        assert_eq!(metric.max_success(1_600), 9);
    }

    #[test]
    fn borrowed_passes_seed_the_future_bucket() {
        let metric = second_window();
        metric.add_waiting(1_600, 3);
        assert_eq!(metric.waiting(1_200), 3);
        assert_eq!(metric.sum(1_200, MetricEvent::Pass), 0);

        // Rotating into the borrowed slice carries the passes over.
        assert_eq!(metric.sum(1_600, MetricEvent::Pass), 3);
        assert_eq!(metric.waiting(1_600), 0);
    }

    #[test]
    fn details_are_sorted_per_bucket_snapshots() {
        let metric = ArrayMetric::new(WindowSpec::minute(), 5000);
        metric.add(3_200, MetricEvent::Pass, 1);
        metric.add(1_100, MetricEvent::Pass, 2);
        metric.add(1_100, MetricEvent::Success, 2);
        metric.add_rt(1_100, 40);

        let details = metric.details(3_500);
        let stamps: Vec<_> = details.iter().map(|d| d.timestamp).collect();
        assert_eq!(stamps, vec![1_000, 3_000]);
        assert_eq!(details[0].rt, 20);
        assert!(details[0].is_active());
    }
}
