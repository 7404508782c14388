use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::bucket::BucketData;
use crate::config::WindowSpec;

const EMPTY: u64 = u64::MAX;

/// Which slots count as live when reading the window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retention {
    /// Slots whose start lies within the last `interval_ms`.
    Past,
    /// Slots whose start is still ahead of `now`; used to hold borrowed passes.
    Future,
}

/// A single ring slot: the start of the slice it currently covers plus its payload.
#[derive(Debug)]
pub struct Slot<T> {
    start: AtomicU64,
    rotate: Mutex<()>,
    value: T,
}

impl<T> Slot<T> {
    pub fn start(&self) -> u64 {
        self.start.load(Ordering::Acquire)
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

/// Fixed-size circular array of buckets mapped onto wall-clock slices.
///
/// A slot is recycled lazily by the first writer that lands on it after its slice
/// has gone stale. Recycling takes only that slot's lock, and the losers of a
/// recycle race spin until the winner publishes the new start, so a slot is reset
/// exactly once per slice.
#[derive(Debug)]
pub struct LeapArray<T> {
    spec: WindowSpec,
    retention: Retention,
    slots: Box<[Slot<T>]>,
}

impl<T: BucketData> LeapArray<T> {
    pub fn new(spec: WindowSpec, make: impl Fn() -> T) -> Self {
        Self::with_retention(spec, Retention::Past, make)
    }

    pub fn with_retention(spec: WindowSpec, retention: Retention, make: impl Fn() -> T) -> Self {
        let slots = (0..spec.sample_count())
            .map(|_| Slot {
                start: AtomicU64::new(EMPTY),
                rotate: Mutex::new(()),
                value: make(),
            })
            .collect();
        Self {
            spec,
            retention,
            slots,
        }
    }

    pub const fn spec(&self) -> WindowSpec {
        self.spec
    }

    fn index_of(&self, time_ms: u64) -> usize {
        ((time_ms / self.spec.bucket_length_ms()) % self.slots.len() as u64) as usize
    }

    fn window_start(&self, time_ms: u64) -> u64 {
        time_ms - time_ms % self.spec.bucket_length_ms()
    }

    /// Returns the slot covering `now`, recycling it first if it holds a stale slice.
    ///
    /// `None` means the slot already holds a slice newer than `now` (the clock moved
    /// backwards); the write is dropped.
    pub fn current_window(&self, now: u64) -> Option<&Slot<T>> {
        self.current_window_with(now, |_, _| {})
    }

    /// Like [`current_window`](Self::current_window) but runs `on_reset` on the payload
    /// right after it is cleared and before the new start is published.
    pub fn current_window_with(
        &self,
        now: u64,
        on_reset: impl Fn(&T, u64),
    ) -> Option<&Slot<T>> {
        let start = self.window_start(now);
        let slot = &self.slots[self.index_of(now)];

        loop {
            let current = slot.start();
            if current == start {
                return Some(slot);
            }
            if current != EMPTY && current > start {
                return None;
            }

            match slot.rotate.try_lock() {
                Some(_guard) => {
                    let current = slot.start();
                    if current == start {
                        return Some(slot);
                    }
                    if current != EMPTY && current > start {
                        return None;
                    }
                    slot.value.reset();
                    on_reset(&slot.value, start);
                    slot.start.store(start, Ordering::Release);
                    return Some(slot);
                }
                None => std::thread::yield_now(),
            }
        }
    }

    /// The slot holding exactly the slice that contains `time`, without recycling.
    pub fn window_at(&self, time: u64) -> Option<&Slot<T>> {
        let slot = &self.slots[self.index_of(time)];
        (slot.start() == self.window_start(time)).then_some(slot)
    }

    /// The slot for the slice immediately before the one containing `now`.
    pub fn previous_window(&self, now: u64) -> Option<&Slot<T>> {
        let previous = now.checked_sub(self.spec.bucket_length_ms())?;
        self.window_at(previous)
            .filter(|slot| !self.is_deprecated(now, slot.start()))
    }

    pub fn is_deprecated(&self, now: u64, start: u64) -> bool {
        if start == EMPTY {
            return true;
        }
        match self.retention {
            Retention::Past => start > now || now - start >= self.spec.interval_ms(),
            Retention::Future => now >= start,
        }
    }

    /// Live slots at `now`. The sequence is lazy and can be requested again at will.
    pub fn values(&self, now: u64) -> impl Iterator<Item = &Slot<T>> + '_ {
        self.slots
            .iter()
            .filter(move |slot| !self.is_deprecated(now, slot.start()))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
    };

    use super::*;
    use crate::stat::bucket::{MetricBucket, MetricEvent};

    fn array(sample_count: u32, interval_ms: u64) -> LeapArray<MetricBucket> {
        LeapArray::new(WindowSpec::new(sample_count, interval_ms).unwrap(), || {
            MetricBucket::new(5000)
        })
    }

    fn pass_sum(array: &LeapArray<MetricBucket>, now: u64) -> u64 {
        array.current_window(now);
        array.values(now).map(|slot| slot.value().pass()).sum()
    }

    #[test]
    fn slots_map_onto_time_slices() {
        let array = array(2, 1000);
        let slot = array.current_window(1_250).unwrap();
        assert_eq!(slot.start(), 1_000);
        let slot = array.current_window(1_700).unwrap();
        assert_eq!(slot.start(), 1_500);
        assert!(std::ptr::eq(
            array.current_window(1_000).unwrap(),
            array.current_window(2_000).unwrap(),
        ));
        assert_eq!(array.current_window(2_000).unwrap().start(), 2_000);
    }

    #[test]
    fn stale_slot_is_reset_before_reuse() {
        let array = array(2, 1000);
        array
            .current_window(1_000)
            .unwrap()
            .value()
            .add(MetricEvent::Pass, 7);
        assert_eq!(pass_sum(&array, 1_400), 7);

        let slot = array.current_window(2_100).unwrap();
        assert_eq!(slot.value().pass(), 0);
        assert_eq!(slot.start(), 2_000);
    }

    #[test]
    fn window_never_reports_events_older_than_interval() {
        let array = array(4, 1000);
        for t in (10_000..14_000).step_by(50) {
            array
                .current_window(t)
                .unwrap()
                .value()
                .add(MetricEvent::Pass, 1);
            // 20 writes per 1000ms window, at most one bucket (5 writes) of slack
            // belongs to the slice that is still filling.
            assert!(pass_sum(&array, t) <= 20);
        }
        assert_eq!(pass_sum(&array, 20_000), 0);
    }

    #[test]
    fn time_going_backwards_drops_the_write() {
        let array = array(2, 1000);
        assert!(array.current_window(5_000).is_some());
        assert!(array.current_window(4_000).is_none());
    }

    #[test]
    fn previous_window_requires_the_adjacent_slice() {
        let array = array(60, 60_000);
        array
            .current_window(10_500)
            .unwrap()
            .value()
            .add(MetricEvent::Pass, 3);
        assert_eq!(array.previous_window(11_200).unwrap().value().pass(), 3);
        assert!(array.previous_window(12_200).is_none());
    }

    #[test]
    fn future_retention_only_keeps_upcoming_slices() {
        let spec = WindowSpec::new(2, 1000).unwrap();
        let array = LeapArray::with_retention(spec, Retention::Future, || MetricBucket::new(5000));
        array
            .current_window(1_500)
            .unwrap()
            .value()
            .add(MetricEvent::Pass, 2);
        assert_eq!(array.values(1_200).count(), 1);
        assert_eq!(array.values(1_500).count(), 0);
    }

    #[test]
    fn racing_writers_reset_a_slot_exactly_once() {
        let array = Arc::new(array(2, 1000));
        array
            .current_window(1_000)
            .unwrap()
            .value()
            .add(MetricEvent::Pass, 100);

        let resets = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let array = Arc::clone(&array);
                let resets = Arc::clone(&resets);
                thread::spawn(move || {
                    let slot = array
                        .current_window_with(2_000, |_, _| {
                            resets.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                    slot.value().add(MetricEvent::Pass, 1);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert_eq!(array.current_window(2_000).unwrap().value().pass(), 8);
    }
}
