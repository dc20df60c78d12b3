use super::bucket::MetricBucket;
use super::leap_array::LeapArray;

/// Snapshot of one second of a 60 s metric, consumed by the metric log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSnapshot {
    pub window_start_ms: u64,
    pub pass: i64,
    pub block: i64,
    pub success: i64,
    pub exception: i64,
    pub rt: i64,
    pub occupied_pass: i64,
}

impl MetricSnapshot {
    pub fn is_empty(&self) -> bool {
        self.pass == 0
            && self.block == 0
            && self.success == 0
            && self.exception == 0
            && self.rt == 0
            && self.occupied_pass == 0
    }
}

/// Sliding-window aggregation over a [`LeapArray`] of [`MetricBucket`]s.
///
/// When built with [`ArrayMetric::occupiable`], a companion ring with the same
/// geometry tracks capacity borrowed for *future* windows: a prioritized call
/// deposits its count at a future window start, and when the main ring rolls
/// into that window the fresh bucket starts from the borrowed count instead
/// of zero.
#[derive(Debug)]
pub struct ArrayMetric {
    data: LeapArray<MetricBucket>,
    borrow: Option<LeapArray<MetricBucket>>,
}

impl ArrayMetric {
    pub fn new(sample_count: u32, interval_ms: u32) -> Self {
        Self {
            data: LeapArray::new(sample_count, interval_ms, MetricBucket::default),
            borrow: None,
        }
    }

    pub fn occupiable(sample_count: u32, interval_ms: u32) -> Self {
        Self {
            data: LeapArray::new(sample_count, interval_ms, MetricBucket::default),
            borrow: Some(LeapArray::new(sample_count, interval_ms, MetricBucket::default)),
        }
    }

    #[inline]
    pub fn window_ms(&self) -> u64 {
        self.data.window_ms()
    }

    #[inline]
    pub fn interval_sec(&self) -> f64 {
        self.data.interval_sec()
    }

    /// The current bucket, seeded from the borrow ring when freshly rolled.
    fn current(&self, now_ms: u64) -> Option<&MetricBucket> {
        let borrowed = self
            .borrow
            .as_ref()
            .and_then(|ring| ring.slot_at(now_ms))
            .map(|slot| slot.bucket().pass())
            .unwrap_or(0);
        self.data
            .current_slot_seeded(now_ms, |bucket| {
                if borrowed > 0 {
                    bucket.seed_pass(borrowed);
                }
            })
            .map(|slot| slot.bucket())
    }

    pub fn add_pass(&self, now_ms: u64, n: i64) {
        if let Some(bucket) = self.current(now_ms) {
            bucket.add_pass(n);
        }
    }

    pub fn add_block(&self, now_ms: u64, n: i64) {
        if let Some(bucket) = self.current(now_ms) {
            bucket.add_block(n);
        }
    }

    pub fn add_exception(&self, now_ms: u64, n: i64) {
        if let Some(bucket) = self.current(now_ms) {
            bucket.add_exception(n);
        }
    }

    pub fn add_success(&self, now_ms: u64, n: i64) {
        if let Some(bucket) = self.current(now_ms) {
            bucket.add_success(n);
        }
    }

    pub fn add_rt(&self, now_ms: u64, rt_ms: i64) {
        if let Some(bucket) = self.current(now_ms) {
            bucket.add_rt(rt_ms);
        }
    }

    pub fn add_occupied_pass(&self, now_ms: u64, n: i64) {
        if let Some(bucket) = self.current(now_ms) {
            bucket.add_occupied_pass(n);
        }
    }

    /// Reads roll the current window first, exactly like writes, so a stale
    /// bucket never lingers in an aggregate and capacity borrowed for the
    /// window we are in becomes observable.
    fn rolled(&self, now_ms: u64) -> &LeapArray<MetricBucket> {
        let _ = self.current(now_ms);
        &self.data
    }

    pub fn pass(&self, now_ms: u64) -> i64 {
        self.rolled(now_ms)
            .valid_slots(now_ms)
            .map(MetricBucket::pass)
            .sum()
    }

    pub fn block(&self, now_ms: u64) -> i64 {
        self.rolled(now_ms)
            .valid_slots(now_ms)
            .map(MetricBucket::block)
            .sum()
    }

    pub fn exception(&self, now_ms: u64) -> i64 {
        self.rolled(now_ms)
            .valid_slots(now_ms)
            .map(MetricBucket::exception)
            .sum()
    }

    pub fn success(&self, now_ms: u64) -> i64 {
        self.rolled(now_ms)
            .valid_slots(now_ms)
            .map(MetricBucket::success)
            .sum()
    }

    pub fn rt(&self, now_ms: u64) -> i64 {
        self.rolled(now_ms)
            .valid_slots(now_ms)
            .map(MetricBucket::rt)
            .sum()
    }

    pub fn occupied_pass(&self, now_ms: u64) -> i64 {
        self.rolled(now_ms)
            .valid_slots(now_ms)
            .map(MetricBucket::occupied_pass)
            .sum()
    }

    pub fn max_success(&self, now_ms: u64) -> i64 {
        self.rolled(now_ms)
            .valid_slots(now_ms)
            .map(MetricBucket::success)
            .max()
            .unwrap_or(0)
    }

    pub fn min_rt(&self, now_ms: u64) -> i64 {
        self.rolled(now_ms)
            .valid_slots(now_ms)
            .map(MetricBucket::min_rt)
            .min()
            .unwrap_or(i64::MAX)
    }

    /// Pass count of the bucket whose window start equals
    /// `aligned_start(time_ms)`; zero if that window has been recycled.
    pub fn window_pass_at(&self, time_ms: u64) -> i64 {
        self.data
            .slot_at(time_ms)
            .map(|slot| slot.bucket().pass())
            .unwrap_or(0)
    }

    /// Pass count of the window immediately before the one covering `now_ms`.
    pub fn previous_window_pass(&self, now_ms: u64) -> i64 {
        match now_ms.checked_sub(self.data.window_ms()) {
            Some(t) => self.window_pass_at(t),
            None => 0,
        }
    }

    pub fn previous_window_block(&self, now_ms: u64) -> i64 {
        match now_ms.checked_sub(self.data.window_ms()) {
            Some(t) => self
                .data
                .slot_at(t)
                .map(|slot| slot.bucket().block())
                .unwrap_or(0),
            None => 0,
        }
    }

    /// Deposits `n` borrowed permits at the window covering `future_ms`.
    pub fn add_waiting(&self, future_ms: u64, n: i64) {
        if let Some(ring) = &self.borrow {
            if let Some(slot) = ring.current_slot(future_ms) {
                slot.bucket().add_pass(n);
            }
        }
    }

    /// Total permits already promised to windows strictly after `now_ms`.
    pub fn waiting(&self, now_ms: u64) -> i64 {
        match &self.borrow {
            Some(ring) => ring
                .stamped_slots()
                .filter(|(start, _)| *start > now_ms)
                .map(|(_, bucket)| bucket.pass())
                .sum(),
            None => 0,
        }
    }

    /// Per-second snapshots of all valid buckets, oldest first. Used by the
    /// 60 s metric to feed the metric log.
    pub fn snapshots(&self, now_ms: u64) -> Vec<MetricSnapshot> {
        let mut out: Vec<MetricSnapshot> = self
            .data
            .stamped_slots()
            .filter(|(start, _)| *start <= now_ms && now_ms - start < self.data.interval_ms())
            .map(|(start, b)| MetricSnapshot {
                window_start_ms: start,
                pass: b.pass(),
                block: b.block(),
                success: b.success(),
                exception: b.exception(),
                rt: b.rt(),
                occupied_pass: b.occupied_pass(),
            })
            .collect();
        out.sort_by_key(|s| s.window_start_ms);
        out
    }
}
