use std::fmt::Debug;
use std::time::Duration;

use crate::node::Node;

/// Outcome of one shaper evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Admit. Queueing shapers may have slept the caller first; the
    /// admission is still booked as a plain pass.
    Pass,
    /// Admit against capacity borrowed from a future window. The caller
    /// already slept the given duration and the pass was deposited through
    /// the occupied path, so the statistic stage must not book it again.
    PassAfter(Duration),
    /// Reject.
    Reject,
}

/// A traffic-shaping policy evaluated against one statistic node.
///
/// Shapers are the only components allowed to sleep the calling thread, and
/// every sleep is bounded by the rule's queueing or occupy timeout.
pub trait TrafficShaper: Send + Sync + Debug {
    fn can_pass(&self, node: &dyn Node, batch: u32, prioritized: bool) -> Verdict;
}
