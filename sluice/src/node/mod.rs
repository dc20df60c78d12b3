//! The per-resource statistics tree: statistic nodes, per-origin cluster
//! aggregates and the context-scoped invocation tree.

mod cluster;
mod default_node;
mod statistic;

pub use cluster::ClusterNode;
pub use default_node::{DefaultNode, NodeKind};
pub use statistic::StatisticNode;

/// The full read/write surface shared by every node flavour.
///
/// Checkers consume this trait; which concrete node a rule is evaluated
/// against is decided by the flow rule checker's node-selection table.
pub trait Node: Send + Sync + std::fmt::Debug {
    // 60 s totals.
    fn total_request(&self) -> i64;
    fn total_pass(&self) -> i64;
    fn total_success(&self) -> i64;
    fn total_exception(&self) -> i64;
    fn block_request(&self) -> i64;

    // 1 s rates.
    fn pass_qps(&self) -> f64;
    fn block_qps(&self) -> f64;
    fn total_qps(&self) -> f64 {
        self.pass_qps() + self.block_qps()
    }
    fn success_qps(&self) -> f64;
    fn exception_qps(&self) -> f64;
    fn occupied_pass_qps(&self) -> f64;
    fn previous_pass_qps(&self) -> f64;
    fn previous_block_qps(&self) -> f64;
    fn max_success_qps(&self) -> f64;
    fn avg_rt(&self) -> f64;
    fn min_rt(&self) -> f64;
    fn cur_thread_num(&self) -> i64;

    // Outcome recording.
    fn add_pass_request(&self, n: u32);
    fn add_rt_and_success(&self, rt_ms: u64, n: u32);
    fn increase_block_qps(&self, n: u32);
    fn increase_exception_qps(&self, n: u32);
    fn increase_thread_num(&self);
    fn decrease_thread_num(&self);

    // Future-capacity borrowing.
    fn add_occupied_pass(&self, n: u32);
    fn add_waiting_request(&self, future_ms: u64, n: u32);
    fn waiting(&self) -> i64;

    /// Walks future windows looking for one with spare capacity; returns the
    /// wait in milliseconds, or `occupy_timeout_ms` to refuse.
    fn try_occupy_next(
        &self,
        now_ms: u64,
        acquire: u32,
        threshold: f64,
        occupy_timeout_ms: u64,
    ) -> u64;

    /// Administrative reset of the short metric.
    fn reset(&self);
}
