//! Strict in-flight limit with adjustable capacity.
//!
//! Checking a limit and then incrementing a counter leaves a window in which several
//! callers can all see room and all proceed. Acquiring a semaphore permit does both
//! in one step, so the limit is never overshot.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// One capacity setting. Identity is the allocation, so generations are compared
/// with `Arc::ptr_eq`.
#[derive(Debug)]
struct Generation {
    capacity: u32,
    semaphore: Arc<Semaphore>,
}

impl Generation {
    fn new(capacity: u32) -> Self {
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
        }
    }

    fn in_use(&self) -> u64 {
        u64::from(self.capacity).saturating_sub(self.semaphore.available_permits() as u64)
    }
}

/// Proof that one in-flight slot was taken. The slot is returned to the generation
/// that issued it when the permit is released or dropped.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    generation: Arc<Generation>,
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyPermit {
    /// Whether both permits were issued under the same capacity setting.
    pub fn same_generation(&self, other: &ConcurrencyPermit) -> bool {
        Arc::ptr_eq(&self.generation, &other.generation)
    }
}

#[derive(Debug, Default)]
pub struct ConcurrencyCounter {
    active: ArcSwapOption<Generation>,
}

impl ConcurrencyCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes one slot if fewer than `max_concurrent` are in use.
    ///
    /// A capacity different from the current generation's starts a new generation.
    /// Permits of the old generation stay valid and drain into it; they are not
    /// counted against the new one.
    pub fn try_compare_and_increase(&self, max_concurrent: u32) -> Option<ConcurrencyPermit> {
        let generation = loop {
            let current = self.active.load_full();
            if let Some(generation) = current.as_ref().filter(|g| g.capacity == max_concurrent) {
                break Arc::clone(generation);
            }

            let fresh = Arc::new(Generation::new(max_concurrent));
            let previous = self
                .active
                .compare_and_swap(&current, Some(Arc::clone(&fresh)));
            let swapped = match (previous.as_ref(), current.as_ref()) {
                (Some(previous), Some(current)) => Arc::ptr_eq(previous, current),
                (None, None) => true,
                _ => false,
            };
            if swapped {
                debug!(
                    message = "Concurrency counter capacity changed.",
                    capacity = max_concurrent,
                );
                break fresh;
            }
        };

        let permit = Arc::clone(&generation.semaphore).try_acquire_owned().ok()?;
        Some(ConcurrencyPermit {
            generation,
            _permit: permit,
        })
    }

    /// Releases a slot. Returns whether it belonged to the current generation.
    pub fn try_decrease(&self, permit: ConcurrencyPermit) -> bool {
        let current = self
            .active
            .load()
            .as_ref()
            .is_some_and(|g| Arc::ptr_eq(g, &permit.generation));
        drop(permit);
        current
    }

    /// Slots in use in the current generation.
    pub fn cur_concurrent_value(&self) -> u64 {
        self.active.load().as_ref().map_or(0, |g| g.in_use())
    }

    pub fn capacity(&self) -> Option<u32> {
        self.active.load().as_ref().map(|g| g.capacity)
    }
}
