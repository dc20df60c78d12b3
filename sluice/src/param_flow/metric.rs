use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::Clock;
use crate::param::ParamValue;
use crate::param_flow::cache::LruCounterMap;
use crate::stat::{LeapArray, WindowBucket};

/// Default per-bucket capacity of the value→counter maps.
pub const PARAM_BUCKET_CAPACITY: usize = 200;
/// Default capacity of the per-slot thread-count map.
pub const THREAD_COUNT_CAPACITY: usize = 4_000;

/// Which counter of a parameter bucket an event lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamEvent {
    Passed,
    Blocked,
}

/// One time bucket of hot-parameter counters: a bounded LRU map per event
/// kind, keyed by the argument value.
#[derive(Debug)]
pub struct ParamMapBucket {
    passed: LruCounterMap<ParamValue>,
    blocked: LruCounterMap<ParamValue>,
}

impl ParamMapBucket {
    fn new(capacity: usize) -> Self {
        Self {
            passed: LruCounterMap::new(capacity),
            blocked: LruCounterMap::new(capacity),
        }
    }

    fn map(&self, event: ParamEvent) -> &LruCounterMap<ParamValue> {
        match event {
            ParamEvent::Passed => &self.passed,
            ParamEvent::Blocked => &self.blocked,
        }
    }
}

impl WindowBucket for ParamMapBucket {
    fn reset(&self) {
        self.passed.clear();
        self.blocked.clear();
    }
}

/// Sliding window of per-value counters for one (resource, argument slot)
/// pair.
#[derive(Debug)]
pub struct HotParameterRing {
    array: LeapArray<ParamMapBucket>,
    clock: Clock,
}

impl HotParameterRing {
    pub fn new(sample_count: u32, interval_ms: u32, clock: Clock) -> Self {
        Self {
            array: LeapArray::new(sample_count, interval_ms, || {
                ParamMapBucket::new(PARAM_BUCKET_CAPACITY)
            }),
            clock,
        }
    }

    pub fn add_value(&self, event: ParamEvent, n: i64, value: &ParamValue) {
        if let Some(slot) = self.array.current_slot(self.clock.now_ms()) {
            slot.bucket().map(event).add(value, n);
        }
    }

    /// Average of `value`'s counters over the valid window, per second.
    pub fn rolling_avg(&self, event: ParamEvent, value: &ParamValue) -> f64 {
        self.rolling_sum(event, value) as f64 / self.array.interval_sec()
    }

    pub fn rolling_sum(&self, event: ParamEvent, value: &ParamValue) -> i64 {
        // Roll the current bucket first so a stale window is not counted.
        let now = self.clock.now_ms();
        let _ = self.array.current_slot(now);
        self.array
            .valid_slots(now)
            .filter_map(|bucket| bucket.map(event).get(value))
            .sum()
    }

    /// The `k` hottest values by summed counter across valid buckets.
    pub fn top_values(&self, event: ParamEvent, k: usize) -> Vec<(ParamValue, i64)> {
        let now = self.clock.now_ms();
        let mut merged: HashMap<ParamValue, i64> = HashMap::new();
        for bucket in self.array.valid_slots(now) {
            for (value, count) in bucket.map(event).snapshot() {
                *merged.entry(value).or_insert(0) += count;
            }
        }
        let mut entries: Vec<_> = merged.into_iter().collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(k);
        entries
    }
}

/// All hot-parameter state of one resource: a counter ring and a live
/// thread-count map per configured argument slot.
#[derive(Debug)]
pub struct ParameterMetric {
    sample_count: u32,
    interval_ms: u32,
    clock: Clock,
    rings: DashMap<usize, Arc<HotParameterRing>>,
    thread_counts: DashMap<usize, Arc<LruCounterMap<ParamValue>>>,
}

impl ParameterMetric {
    pub fn new(sample_count: u32, interval_ms: u32, clock: Clock) -> Self {
        Self {
            sample_count,
            interval_ms,
            clock,
            rings: DashMap::new(),
            thread_counts: DashMap::new(),
        }
    }

    /// Ensures counters exist for an argument slot named by a rule.
    pub fn initialize_for_index(&self, index: usize) {
        self.rings.entry(index).or_insert_with(|| {
            Arc::new(HotParameterRing::new(
                self.sample_count,
                self.interval_ms,
                self.clock.clone(),
            ))
        });
        self.thread_counts
            .entry(index)
            .or_insert_with(|| Arc::new(LruCounterMap::new(THREAD_COUNT_CAPACITY)));
    }

    fn for_each_tracked_value(
        args: &[ParamValue],
        index: usize,
        mut f: impl FnMut(&ParamValue),
    ) {
        let Some(arg) = args.get(index) else { return };
        match arg {
            ParamValue::List(values) => values.iter().for_each(&mut f),
            value => f(value),
        }
    }

    pub fn add_pass(&self, n: u32, args: &[ParamValue]) {
        self.add(ParamEvent::Passed, n, args);
    }

    pub fn add_block(&self, n: u32, args: &[ParamValue]) {
        self.add(ParamEvent::Blocked, n, args);
    }

    fn add(&self, event: ParamEvent, n: u32, args: &[ParamValue]) {
        for entry in self.rings.iter() {
            Self::for_each_tracked_value(args, *entry.key(), |value| {
                entry.value().add_value(event, n as i64, value);
            });
        }
    }

    pub fn add_thread_count(&self, args: &[ParamValue]) {
        for entry in self.thread_counts.iter() {
            Self::for_each_tracked_value(args, *entry.key(), |value| {
                entry.value().add(value, 1);
            });
        }
    }

    pub fn decrease_thread_count(&self, args: &[ParamValue]) {
        for entry in self.thread_counts.iter() {
            Self::for_each_tracked_value(args, *entry.key(), |value| {
                entry.value().decrement_and_prune(value);
            });
        }
    }

    pub fn pass_param_qps(&self, index: usize, value: &ParamValue) -> f64 {
        match self.rings.get(&index) {
            Some(ring) => ring.rolling_avg(ParamEvent::Passed, value),
            None => 0.0,
        }
    }

    pub fn block_param_qps(&self, index: usize, value: &ParamValue) -> f64 {
        match self.rings.get(&index) {
            Some(ring) => ring.rolling_avg(ParamEvent::Blocked, value),
            None => 0.0,
        }
    }

    pub fn thread_count(&self, index: usize, value: &ParamValue) -> i64 {
        self.thread_counts
            .get(&index)
            .and_then(|map| map.get(value))
            .unwrap_or(0)
    }

    pub fn top_pass_values(&self, index: usize, k: usize) -> Vec<(ParamValue, i64)> {
        match self.rings.get(&index) {
            Some(ring) => ring.top_values(ParamEvent::Passed, k),
            None => Vec::new(),
        }
    }

    pub fn clear(&self) {
        self.rings.clear();
        self.thread_counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn metric() -> (ParameterMetric, Arc<quanta::Mock>) {
        let (clock, mock) = Clock::mock();
        mock.increment(Duration::from_millis(100));
        let metric = ParameterMetric::new(2, 1_000, clock);
        metric.initialize_for_index(0);
        metric.initialize_for_index(1);
        (metric, mock)
    }

    #[test]
    fn counters_per_slot_are_independent() {
        let (metric, _mock) = metric();
        let x = ParamValue::from(42);

        metric.add_pass(3, &[x.clone(), x.clone()]);
        metric.add_pass(2, &[x.clone()]);

        assert_eq!(metric.pass_param_qps(0, &x), 5.0);
        assert_eq!(metric.pass_param_qps(1, &x), 3.0);
    }

    #[test]
    fn values_in_one_slot_are_independent() {
        let (metric, _mock) = metric();
        let x = ParamValue::from("x");
        let y = ParamValue::from("y");

        metric.add_pass(4, &[x.clone()]);
        metric.add_pass(1, &[y.clone()]);

        assert_eq!(metric.pass_param_qps(0, &x), 4.0);
        assert_eq!(metric.pass_param_qps(0, &y), 1.0);
    }

    #[test]
    fn list_arguments_are_flattened() {
        let (metric, _mock) = metric();
        let list = ParamValue::from(vec![1i64, 2, 1]);

        metric.add_pass(1, &[list]);

        assert_eq!(metric.pass_param_qps(0, &ParamValue::from(1i64)), 2.0);
        assert_eq!(metric.pass_param_qps(0, &ParamValue::from(2i64)), 1.0);
    }

    #[test]
    fn old_windows_age_out_of_the_rolling_avg() {
        let (metric, mock) = metric();
        let x = ParamValue::from(7);

        metric.add_pass(5, &[x.clone()]);
        assert_eq!(metric.pass_param_qps(0, &x), 5.0);

        mock.increment(Duration::from_millis(2_000));
        assert_eq!(metric.pass_param_qps(0, &x), 0.0);
    }

    #[test]
    fn thread_counts_balance_out() {
        let (metric, _mock) = metric();
        let x = ParamValue::from("conn");

        metric.add_thread_count(&[x.clone()]);
        metric.add_thread_count(&[x.clone()]);
        assert_eq!(metric.thread_count(0, &x), 2);

        metric.decrease_thread_count(&[x.clone()]);
        metric.decrease_thread_count(&[x.clone()]);
        assert_eq!(metric.thread_count(0, &x), 0);
    }

    #[test]
    fn top_values_merge_across_buckets() {
        let (metric, mock) = metric();
        metric.add_pass(5, &[ParamValue::from("hot")]);
        metric.add_pass(1, &[ParamValue::from("warm")]);

        mock.increment(Duration::from_millis(500));
        metric.add_pass(4, &[ParamValue::from("hot")]);
        metric.add_pass(2, &[ParamValue::from("cool")]);

        let ring = metric.rings.get(&0).unwrap().clone();
        let top = ring.top_values(ParamEvent::Passed, 2);
        assert_eq!(top[0], (ParamValue::from("hot"), 9));
        assert_eq!(top[1], (ParamValue::from("cool"), 2));
    }
}
