use std::hint;
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter holder that can be zeroed in place when its window is recycled.
pub trait WindowBucket: Send + Sync {
    fn reset(&self);
}

/// Stamp values outside the reachable window-start range.
const STAMP_EMPTY: u64 = u64::MAX;
const STAMP_LOCKED: u64 = u64::MAX - 1;

/// One ring position: the bucket plus the window start it currently covers.
#[derive(Debug)]
pub struct WindowSlot<B> {
    start: AtomicU64,
    bucket: B,
}

impl<B> WindowSlot<B> {
    #[inline]
    pub fn window_start(&self) -> u64 {
        self.start.load(Ordering::Acquire)
    }

    #[inline]
    pub fn bucket(&self) -> &B {
        &self.bucket
    }
}

/// Fixed ring of `sample_count` time buckets covering `interval_ms`.
///
/// Buckets are recycled lazily: the caller that first touches a slot whose
/// stored window start is stale claims it with a CAS, zeroes the counters and
/// publishes the new start. Racing callers spin until the winner publishes.
/// A slot stamped *later* than the caller's time means the clock went
/// backwards; no bucket is returned and the write is dropped.
#[derive(Debug)]
pub struct LeapArray<B> {
    window_ms: u64,
    interval_ms: u64,
    slots: Box<[WindowSlot<B>]>,
}

impl<B: WindowBucket> LeapArray<B> {
    pub fn new(sample_count: u32, interval_ms: u32, mut init: impl FnMut() -> B) -> Self {
        debug_assert!(sample_count > 0 && interval_ms % sample_count == 0);
        let slots = (0..sample_count)
            .map(|_| WindowSlot {
                start: AtomicU64::new(STAMP_EMPTY),
                bucket: init(),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            window_ms: (interval_ms / sample_count) as u64,
            interval_ms: interval_ms as u64,
            slots,
        }
    }

    #[inline]
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    #[inline]
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    #[inline]
    pub fn interval_sec(&self) -> f64 {
        self.interval_ms as f64 / 1_000.0
    }

    #[inline]
    pub fn aligned_start(&self, time_ms: u64) -> u64 {
        time_ms - time_ms % self.window_ms
    }

    /// The slot covering `time_ms`, recycling it if its window is stale.
    pub fn current_slot(&self, time_ms: u64) -> Option<&WindowSlot<B>> {
        self.current_slot_seeded(time_ms, |_| {})
    }

    /// Like [`Self::current_slot`], with a hook invoked on the zeroed bucket
    /// before the new window start becomes visible to other threads.
    pub fn current_slot_seeded(
        &self,
        time_ms: u64,
        seed: impl Fn(&B),
    ) -> Option<&WindowSlot<B>> {
        let idx = ((time_ms / self.window_ms) as usize) % self.slots.len();
        let expected = self.aligned_start(time_ms);
        let slot = &self.slots[idx];

        loop {
            let stored = slot.start.load(Ordering::Acquire);
            if stored == expected {
                return Some(slot);
            }
            if stored == STAMP_LOCKED {
                // Another thread is mid-reset; its publish is imminent.
                hint::spin_loop();
                continue;
            }
            if stored == STAMP_EMPTY || stored < expected {
                if slot
                    .start
                    .compare_exchange(stored, STAMP_LOCKED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    slot.bucket.reset();
                    seed(&slot.bucket);
                    slot.start.store(expected, Ordering::Release);
                    return Some(slot);
                }
                continue;
            }
            // stored > expected: the clock ran backwards. Leave the slot alone.
            return None;
        }
    }

    /// Read-only lookup of the bucket whose window start equals
    /// `aligned_start(time_ms)`. Never recycles.
    pub fn slot_at(&self, time_ms: u64) -> Option<&WindowSlot<B>> {
        let idx = ((time_ms / self.window_ms) as usize) % self.slots.len();
        let slot = &self.slots[idx];
        if slot.start.load(Ordering::Acquire) == self.aligned_start(time_ms) {
            Some(slot)
        } else {
            None
        }
    }

    /// All initialised slots with their current window start. Slots that are
    /// mid-reset are skipped; callers filter by validity themselves.
    pub fn stamped_slots(&self) -> impl Iterator<Item = (u64, &B)> {
        self.slots.iter().filter_map(|slot| {
            let start = slot.start.load(Ordering::Acquire);
            (start != STAMP_EMPTY && start != STAMP_LOCKED).then_some((start, &slot.bucket))
        })
    }

    /// Slots whose window lies within `[now - interval_ms, now]`.
    pub fn valid_slots(&self, now_ms: u64) -> impl Iterator<Item = &B> + '_ {
        self.stamped_slots().filter_map(move |(start, bucket)| {
            (start <= now_ms && now_ms - start < self.interval_ms).then_some(bucket)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Counter(AtomicI64);

    impl Counter {
        fn add(&self, n: i64) {
            self.0.fetch_add(n, Ordering::Relaxed);
        }
        fn get(&self) -> i64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    impl WindowBucket for Counter {
        fn reset(&self) {
            self.0.store(0, Ordering::Relaxed);
        }
    }

    fn ring() -> LeapArray<Counter> {
        LeapArray::new(2, 1_000, Counter::default)
    }

    #[test]
    fn bucket_index_and_alignment() {
        let arr = ring();
        assert_eq!(arr.aligned_start(0), 0);
        assert_eq!(arr.aligned_start(499), 0);
        assert_eq!(arr.aligned_start(500), 500);
        assert_eq!(arr.aligned_start(1_234), 1_000);
    }

    #[test]
    fn wrapping_recycles_the_stale_bucket() {
        let arr = ring();
        arr.current_slot(100).unwrap().bucket().add(7);
        assert_eq!(arr.current_slot(100).unwrap().bucket().get(), 7);

        // Same ring position one full interval later: counters must be zeroed.
        let slot = arr.current_slot(1_100).unwrap();
        assert_eq!(slot.window_start(), 1_000);
        assert_eq!(slot.bucket().get(), 0);
    }

    #[test]
    fn clock_going_backwards_yields_no_bucket() {
        let arr = ring();
        arr.current_slot(2_100).unwrap().bucket().add(1);
        assert!(arr.current_slot(100).is_none());
        // The future-stamped bucket was left untouched.
        assert_eq!(arr.slot_at(2_100).unwrap().bucket().get(), 1);
    }

    #[test]
    fn only_windows_inside_the_interval_are_valid() {
        let arr = ring();
        arr.current_slot(0).unwrap().bucket().add(1);
        arr.current_slot(500).unwrap().bucket().add(2);

        let sum: i64 = arr.valid_slots(600).map(Counter::get).sum();
        assert_eq!(sum, 3);

        // At t=1100 the bucket stamped 0 is a full interval old.
        let sum: i64 = arr.valid_slots(1_100).map(Counter::get).sum();
        assert_eq!(sum, 2);
    }

    #[test]
    fn racing_resets_zero_exactly_once() {
        let arr = Arc::new(ring());
        // Stamp the slot with an old window, then race to roll it forward.
        arr.current_slot(0).unwrap().bucket().add(50);

        let mut handles = vec![];
        for _ in 0..8 {
            let arr = Arc::clone(&arr);
            handles.push(std::thread::spawn(move || {
                let slot = arr.current_slot(1_000).unwrap();
                slot.bucket().add(1);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        // The pre-reset 50 is gone; each thread's post-reset add survives.
        assert_eq!(arr.slot_at(1_000).unwrap().bucket().get(), 8);
    }
}
