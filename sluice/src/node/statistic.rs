use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::clock::Clock;
use crate::node::Node;
use crate::stat::{ArrayMetric, MetricSnapshot};

/// Real-time statistics holder: a 1 s rolling metric at the configured sample
/// count, a 60 s rolling metric at one bucket per second, and a live thread
/// counter.
///
/// The short metric carries the future-occupancy ring so prioritized calls
/// can borrow capacity from upcoming windows.
#[derive(Debug)]
pub struct StatisticNode {
    second: ArcSwap<ArrayMetric>,
    minute: ArrayMetric,
    cur_thread: AtomicI64,
    clock: Clock,
    sample_count: u32,
    interval_ms: u32,
}

impl StatisticNode {
    pub fn new(clock: Clock, sample_count: u32, interval_ms: u32) -> Self {
        Self {
            second: ArcSwap::from_pointee(ArrayMetric::occupiable(sample_count, interval_ms)),
            minute: ArrayMetric::new(60, 60_000),
            cur_thread: AtomicI64::new(0),
            clock,
            sample_count,
            interval_ms,
        }
    }

    #[inline]
    fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    #[inline]
    fn interval_sec(&self) -> f64 {
        self.interval_ms as f64 / 1_000.0
    }

    /// Per-second rows of the 60 s metric, for the metric log.
    pub fn minute_snapshots(&self) -> Vec<MetricSnapshot> {
        self.minute.snapshots(self.now())
    }
}

impl Node for StatisticNode {
    fn total_request(&self) -> i64 {
        let now = self.now();
        self.minute.pass(now) + self.minute.block(now)
    }

    fn total_pass(&self) -> i64 {
        self.minute.pass(self.now())
    }

    fn total_success(&self) -> i64 {
        self.minute.success(self.now())
    }

    fn total_exception(&self) -> i64 {
        self.minute.exception(self.now())
    }

    fn block_request(&self) -> i64 {
        self.minute.block(self.now())
    }

    fn pass_qps(&self) -> f64 {
        self.second.load().pass(self.now()) as f64 / self.interval_sec()
    }

    fn block_qps(&self) -> f64 {
        self.second.load().block(self.now()) as f64 / self.interval_sec()
    }

    fn success_qps(&self) -> f64 {
        self.second.load().success(self.now()) as f64 / self.interval_sec()
    }

    fn exception_qps(&self) -> f64 {
        self.second.load().exception(self.now()) as f64 / self.interval_sec()
    }

    fn occupied_pass_qps(&self) -> f64 {
        self.second.load().occupied_pass(self.now()) as f64 / self.interval_sec()
    }

    fn previous_pass_qps(&self) -> f64 {
        self.minute.previous_window_pass(self.now()) as f64
    }

    fn previous_block_qps(&self) -> f64 {
        self.minute.previous_window_block(self.now()) as f64
    }

    fn max_success_qps(&self) -> f64 {
        let second = self.second.load();
        second.max_success(self.now()) as f64 * self.sample_count as f64 / self.interval_sec()
    }

    fn avg_rt(&self) -> f64 {
        let second = self.second.load();
        let now = self.now();
        let success = second.success(now);
        if success == 0 {
            return 0.0;
        }
        second.rt(now) as f64 / success as f64
    }

    fn min_rt(&self) -> f64 {
        let min = self.second.load().min_rt(self.now());
        if min == i64::MAX {
            0.0
        } else {
            min as f64
        }
    }

    fn cur_thread_num(&self) -> i64 {
        self.cur_thread.load(Ordering::Relaxed)
    }

    fn add_pass_request(&self, n: u32) {
        let now = self.now();
        self.second.load().add_pass(now, n as i64);
        self.minute.add_pass(now, n as i64);
    }

    fn add_rt_and_success(&self, rt_ms: u64, n: u32) {
        let now = self.now();
        let second = self.second.load();
        second.add_success(now, n as i64);
        second.add_rt(now, rt_ms as i64);
        self.minute.add_success(now, n as i64);
        self.minute.add_rt(now, rt_ms as i64);
    }

    fn increase_block_qps(&self, n: u32) {
        let now = self.now();
        self.second.load().add_block(now, n as i64);
        self.minute.add_block(now, n as i64);
    }

    fn increase_exception_qps(&self, n: u32) {
        let now = self.now();
        self.second.load().add_exception(now, n as i64);
        self.minute.add_exception(now, n as i64);
    }

    fn increase_thread_num(&self) {
        self.cur_thread.fetch_add(1, Ordering::Relaxed);
    }

    fn decrease_thread_num(&self) {
        self.cur_thread.fetch_sub(1, Ordering::Relaxed);
    }

    fn add_occupied_pass(&self, n: u32) {
        // Borrowed admissions surface in the long metric only; the short
        // metric sees them when the borrowed window is actually entered.
        let now = self.now();
        self.minute.add_occupied_pass(now, n as i64);
        self.minute.add_pass(now, n as i64);
    }

    fn add_waiting_request(&self, future_ms: u64, n: u32) {
        self.second.load().add_waiting(future_ms, n as i64);
    }

    fn waiting(&self) -> i64 {
        self.second.load().waiting(self.now())
    }

    fn try_occupy_next(
        &self,
        now_ms: u64,
        acquire: u32,
        threshold: f64,
        occupy_timeout_ms: u64,
    ) -> u64 {
        let second = self.second.load();
        let max_count = threshold * second.interval_sec();
        let current_borrow = second.waiting(now_ms);
        if current_borrow as f64 >= max_count {
            return occupy_timeout_ms;
        }

        let window_ms = second.window_ms();
        let interval_ms = self.interval_ms as u64;
        let mut earliest =
            (now_ms - now_ms % window_ms + window_ms).saturating_sub(interval_ms);
        let mut idx: u64 = 0;
        // May lag behind concurrent writers; under contention slightly more
        // capacity than the threshold can be promised.
        let mut current_pass = second.pass(now_ms);

        while earliest < now_ms {
            let wait_ms = idx * window_ms + window_ms - now_ms % window_ms;
            if wait_ms >= occupy_timeout_ms {
                break;
            }
            let window_pass = second.window_pass_at(earliest);
            if (current_pass + current_borrow + acquire as i64 - window_pass) as f64 <= max_count
            {
                return wait_ms;
            }
            earliest += window_ms;
            current_pass -= window_pass;
            idx += 1;
        }

        occupy_timeout_ms
    }

    fn reset(&self) {
        self.second.store(Arc::new(ArrayMetric::occupiable(
            self.sample_count,
            self.interval_ms,
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn mock_node() -> (StatisticNode, Arc<quanta::Mock>) {
        let (clock, mock) = Clock::mock();
        (StatisticNode::new(clock, 2, 1_000), mock)
    }

    #[test]
    fn pass_qps_is_per_second() {
        let (node, mock) = mock_node();
        mock.increment(Duration::from_millis(100));
        node.add_pass_request(3);
        node.add_pass_request(2);
        assert_eq!(node.pass_qps(), 5.0);
        assert_eq!(node.total_pass(), 5);
    }

    #[test]
    fn avg_rt_is_weighted_by_success() {
        let (node, mock) = mock_node();
        mock.increment(Duration::from_millis(100));
        node.add_rt_and_success(30, 1);
        node.add_rt_and_success(10, 1);
        assert_eq!(node.avg_rt(), 20.0);
        assert_eq!(node.min_rt(), 10.0);
    }

    #[test]
    fn thread_counter_moves_both_ways() {
        let (node, _mock) = mock_node();
        node.increase_thread_num();
        node.increase_thread_num();
        node.decrease_thread_num();
        assert_eq!(node.cur_thread_num(), 1);
    }

    #[test]
    fn occupy_walk_refuses_when_future_is_full() {
        let (node, mock) = mock_node();
        mock.increment(Duration::from_millis(700));
        // threshold 2/s over one second: promise both future permits.
        node.add_waiting_request(1_000, 2);
        let wait = node.try_occupy_next(700, 1, 2.0, 500);
        assert_eq!(wait, 500);
    }

    #[test]
    fn occupy_walk_finds_the_next_free_window() {
        let (node, mock) = mock_node();
        mock.increment(Duration::from_millis(100));
        // Saturate the interval inside the window at [0, 500).
        node.add_pass_request(10);
        mock.increment(Duration::from_millis(600));
        let wait = node.try_occupy_next(700, 1, 10.0, 500);
        // That window ages out 300 ms from now, freeing its 10 permits.
        assert_eq!(wait, 300);
    }

    #[test]
    fn occupy_walk_gives_up_when_no_window_frees_capacity() {
        let (node, mock) = mock_node();
        mock.increment(Duration::from_millis(700));
        // All 10 permits sit in the window that stays valid past the horizon.
        node.add_pass_request(10);
        let wait = node.try_occupy_next(700, 1, 10.0, 500);
        assert_eq!(wait, 500);
    }

    #[test]
    fn reset_clears_the_short_metric_only() {
        let (node, mock) = mock_node();
        mock.increment(Duration::from_millis(100));
        node.add_pass_request(4);
        node.reset();
        assert_eq!(node.pass_qps(), 0.0);
        assert_eq!(node.total_pass(), 4);
    }
}
