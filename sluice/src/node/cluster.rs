use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::Clock;
use crate::node::{Node, StatisticNode};

/// Process-wide aggregate for one resource, independent of context, plus a
/// lazily populated statistic node per calling origin.
#[derive(Debug)]
pub struct ClusterNode {
    stat: StatisticNode,
    origins: DashMap<Arc<str>, Arc<StatisticNode>>,
    clock: Clock,
    sample_count: u32,
    interval_ms: u32,
}

impl ClusterNode {
    pub fn new(clock: Clock, sample_count: u32, interval_ms: u32) -> Self {
        Self {
            stat: StatisticNode::new(clock.clone(), sample_count, interval_ms),
            origins: DashMap::new(),
            clock,
            sample_count,
            interval_ms,
        }
    }

    pub fn stat(&self) -> &StatisticNode {
        &self.stat
    }

    /// The statistic node for `origin`, created on first sight.
    pub fn origin_node(&self, origin: &Arc<str>) -> Arc<StatisticNode> {
        self.origins
            .entry(Arc::clone(origin))
            .or_insert_with(|| {
                Arc::new(StatisticNode::new(
                    self.clock.clone(),
                    self.sample_count,
                    self.interval_ms,
                ))
            })
            .clone()
    }

    pub fn origin_count(&self) -> usize {
        self.origins.len()
    }
}

impl Node for ClusterNode {
    fn total_request(&self) -> i64 {
        self.stat.total_request()
    }
    fn total_pass(&self) -> i64 {
        self.stat.total_pass()
    }
    fn total_success(&self) -> i64 {
        self.stat.total_success()
    }
    fn total_exception(&self) -> i64 {
        self.stat.total_exception()
    }
    fn block_request(&self) -> i64 {
        self.stat.block_request()
    }
    fn pass_qps(&self) -> f64 {
        self.stat.pass_qps()
    }
    fn block_qps(&self) -> f64 {
        self.stat.block_qps()
    }
    fn success_qps(&self) -> f64 {
        self.stat.success_qps()
    }
    fn exception_qps(&self) -> f64 {
        self.stat.exception_qps()
    }
    fn occupied_pass_qps(&self) -> f64 {
        self.stat.occupied_pass_qps()
    }
    fn previous_pass_qps(&self) -> f64 {
        self.stat.previous_pass_qps()
    }
    fn previous_block_qps(&self) -> f64 {
        self.stat.previous_block_qps()
    }
    fn max_success_qps(&self) -> f64 {
        self.stat.max_success_qps()
    }
    fn avg_rt(&self) -> f64 {
        self.stat.avg_rt()
    }
    fn min_rt(&self) -> f64 {
        self.stat.min_rt()
    }
    fn cur_thread_num(&self) -> i64 {
        self.stat.cur_thread_num()
    }
    fn add_pass_request(&self, n: u32) {
        self.stat.add_pass_request(n);
    }
    fn add_rt_and_success(&self, rt_ms: u64, n: u32) {
        self.stat.add_rt_and_success(rt_ms, n);
    }
    fn increase_block_qps(&self, n: u32) {
        self.stat.increase_block_qps(n);
    }
    fn increase_exception_qps(&self, n: u32) {
        self.stat.increase_exception_qps(n);
    }
    fn increase_thread_num(&self) {
        self.stat.increase_thread_num();
    }
    fn decrease_thread_num(&self) {
        self.stat.decrease_thread_num();
    }
    fn add_occupied_pass(&self, n: u32) {
        self.stat.add_occupied_pass(n);
    }
    fn add_waiting_request(&self, future_ms: u64, n: u32) {
        self.stat.add_waiting_request(future_ms, n);
    }
    fn waiting(&self) -> i64 {
        self.stat.waiting()
    }
    fn try_occupy_next(
        &self,
        now_ms: u64,
        acquire: u32,
        threshold: f64,
        occupy_timeout_ms: u64,
    ) -> u64 {
        self.stat
            .try_occupy_next(now_ms, acquire, threshold, occupy_timeout_ms)
    }
    fn reset(&self) {
        self.stat.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_origin_yields_same_node() {
        let (clock, _mock) = Clock::mock();
        let cluster = ClusterNode::new(clock, 2, 1_000);

        let a: Arc<str> = Arc::from("billing");
        let n1 = cluster.origin_node(&a);
        let n2 = cluster.origin_node(&a);
        assert!(Arc::ptr_eq(&n1, &n2));
        assert_eq!(cluster.origin_count(), 1);

        let b: Arc<str> = Arc::from("search");
        let n3 = cluster.origin_node(&b);
        assert!(!Arc::ptr_eq(&n1, &n3));
        assert_eq!(cluster.origin_count(), 2);
    }
}
