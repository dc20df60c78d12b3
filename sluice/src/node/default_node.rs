use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::clock::Clock;
use crate::node::{ClusterNode, Node, StatisticNode};
use crate::resource::Resource;

/// Whether a node reads its own counters or aggregates its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A per-(context, resource) node in the invocation tree.
    Plain,
    /// An entrance: metric reads sum over the immediate children, with
    /// average RT weighted by pass QPS.
    Entrance,
}

/// Per-(context, resource) statistics node. Nodes form the invocation tree
/// under each context's entrance node; every plain node also back-references
/// the cluster node of its resource.
#[derive(Debug)]
pub struct DefaultNode {
    resource: Resource,
    kind: NodeKind,
    stat: StatisticNode,
    cluster: OnceLock<Arc<ClusterNode>>,
    children: DashMap<Arc<str>, Arc<DefaultNode>>,
}

impl DefaultNode {
    pub fn new(resource: Resource, kind: NodeKind, clock: Clock, sample_count: u32, interval_ms: u32) -> Self {
        Self {
            resource,
            kind,
            stat: StatisticNode::new(clock, sample_count, interval_ms),
            cluster: OnceLock::new(),
            children: DashMap::new(),
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn stat(&self) -> &StatisticNode {
        &self.stat
    }

    /// The cluster node assigned by the cluster-builder stage, if any.
    pub fn cluster_node(&self) -> Option<&Arc<ClusterNode>> {
        self.cluster.get()
    }

    /// First assignment wins; repeat assignments of the same shared node are
    /// the common case and are ignored.
    pub fn set_cluster_node(&self, cluster: Arc<ClusterNode>) {
        let _ = self.cluster.set(cluster);
    }

    pub fn add_child(&self, child: Arc<DefaultNode>) {
        self.children
            .entry(Arc::clone(child.resource.name()))
            .or_insert(child);
    }

    pub fn children(&self) -> Vec<Arc<DefaultNode>> {
        self.children.iter().map(|e| Arc::clone(e.value())).collect()
    }

    fn sum(&self, f: impl Fn(&DefaultNode) -> f64) -> f64 {
        self.children.iter().map(|e| f(e.value())).sum()
    }

    fn sum_i64(&self, f: impl Fn(&DefaultNode) -> i64) -> i64 {
        self.children.iter().map(|e| f(e.value())).sum()
    }
}

impl Node for DefaultNode {
    fn total_request(&self) -> i64 {
        match self.kind {
            NodeKind::Plain => self.stat.total_request(),
            NodeKind::Entrance => self.sum_i64(|c| c.total_request()),
        }
    }

    fn total_pass(&self) -> i64 {
        match self.kind {
            NodeKind::Plain => self.stat.total_pass(),
            NodeKind::Entrance => self.sum_i64(|c| c.total_pass()),
        }
    }

    fn total_success(&self) -> i64 {
        self.stat.total_success()
    }

    fn total_exception(&self) -> i64 {
        self.stat.total_exception()
    }

    fn block_request(&self) -> i64 {
        match self.kind {
            NodeKind::Plain => self.stat.block_request(),
            NodeKind::Entrance => self.sum_i64(|c| c.block_request()),
        }
    }

    fn pass_qps(&self) -> f64 {
        match self.kind {
            NodeKind::Plain => self.stat.pass_qps(),
            NodeKind::Entrance => self.sum(|c| c.pass_qps()),
        }
    }

    fn block_qps(&self) -> f64 {
        match self.kind {
            NodeKind::Plain => self.stat.block_qps(),
            NodeKind::Entrance => self.sum(|c| c.block_qps()),
        }
    }

    fn total_qps(&self) -> f64 {
        match self.kind {
            NodeKind::Plain => self.stat.total_qps(),
            NodeKind::Entrance => self.sum(|c| c.total_qps()),
        }
    }

    fn success_qps(&self) -> f64 {
        match self.kind {
            NodeKind::Plain => self.stat.success_qps(),
            NodeKind::Entrance => self.sum(|c| c.success_qps()),
        }
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
        match self.kind {
            NodeKind::Plain => self.stat.avg_rt(),
            NodeKind::Entrance => {
                let mut total = 0.0;
                let mut total_qps = 0.0;
                for child in self.children.iter() {
                    total += child.avg_rt() * child.pass_qps();
                    total_qps += child.pass_qps();
                }
                total / if total_qps == 0.0 { 1.0 } else { total_qps }
            }
        }
    }

    fn min_rt(&self) -> f64 {
        self.stat.min_rt()
    }

    fn cur_thread_num(&self) -> i64 {
        match self.kind {
            NodeKind::Plain => self.stat.cur_thread_num(),
            NodeKind::Entrance => self.sum_i64(|c| c.cur_thread_num()),
        }
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
    use std::time::Duration;

    fn plain(name: &str, clock: &Clock) -> Arc<DefaultNode> {
        Arc::new(DefaultNode::new(
            Resource::outbound(name),
            NodeKind::Plain,
            clock.clone(),
            2,
            1_000,
        ))
    }

    #[test]
    fn entrance_reads_sum_children() {
        let (clock, mock) = Clock::mock();
        mock.increment(Duration::from_millis(100));

        let entrance = DefaultNode::new(
            Resource::outbound("web"),
            NodeKind::Entrance,
            clock.clone(),
            2,
            1_000,
        );
        let a = plain("a", &clock);
        let b = plain("b", &clock);
        entrance.add_child(Arc::clone(&a));
        entrance.add_child(Arc::clone(&b));

        a.add_pass_request(3);
        b.add_pass_request(1);
        a.increase_thread_num();

        assert_eq!(entrance.pass_qps(), 4.0);
        assert_eq!(entrance.cur_thread_num(), 1);
    }

    #[test]
    fn entrance_avg_rt_is_qps_weighted() {
        let (clock, mock) = Clock::mock();
        mock.increment(Duration::from_millis(100));

        let entrance = DefaultNode::new(
            Resource::outbound("web"),
            NodeKind::Entrance,
            clock.clone(),
            2,
            1_000,
        );
        let a = plain("a", &clock);
        let b = plain("b", &clock);
        entrance.add_child(Arc::clone(&a));
        entrance.add_child(Arc::clone(&b));

        // a: 3 passes at 10 ms, b: 1 pass at 50 ms.
        a.add_pass_request(3);
        a.add_rt_and_success(30, 3);
        b.add_pass_request(1);
        b.add_rt_and_success(50, 1);

        // (10 * 3 + 50 * 1) / 4 = 20
        assert_eq!(entrance.avg_rt(), 20.0);
    }

    #[test]
    fn adding_the_same_child_twice_keeps_one() {
        let (clock, _mock) = Clock::mock();
        let entrance = DefaultNode::new(
            Resource::outbound("web"),
            NodeKind::Entrance,
            clock.clone(),
            2,
            1_000,
        );
        let a = plain("a", &clock);
        entrance.add_child(Arc::clone(&a));
        entrance.add_child(Arc::clone(&a));
        assert_eq!(entrance.children().len(), 1);
    }
}
