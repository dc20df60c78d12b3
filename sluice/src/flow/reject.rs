use std::time::Duration;

use crate::clock::Clock;
use crate::flow::shaper::{TrafficShaper, Verdict};
use crate::flow::FlowGrade;
use crate::node::Node;

/// Fast-fail shaping: compare current usage against the threshold and reject
/// anything above it.
///
/// A prioritized QPS call that would be rejected may instead borrow capacity
/// from an upcoming window: the walk over future windows yields a wait, the
/// caller sleeps it off here, and the admission is reported as delayed.
#[derive(Debug)]
pub struct RejectShaper {
    grade: FlowGrade,
    count: f64,
    occupy_timeout_ms: u64,
    clock: Clock,
}

impl RejectShaper {
    pub fn new(grade: FlowGrade, count: f64, occupy_timeout_ms: u64, clock: Clock) -> Self {
        Self {
            grade,
            count,
            occupy_timeout_ms,
            clock,
        }
    }

    fn used_tokens(&self, node: &dyn Node) -> f64 {
        match self.grade {
            FlowGrade::Thread => node.cur_thread_num() as f64,
            FlowGrade::Qps => node.pass_qps(),
        }
    }
}

impl TrafficShaper for RejectShaper {
    fn can_pass(&self, node: &dyn Node, batch: u32, prioritized: bool) -> Verdict {
        if self.used_tokens(node) + batch as f64 <= self.count {
            return Verdict::Pass;
        }

        if prioritized && self.grade == FlowGrade::Qps {
            let now = self.clock.now_ms();
            let wait_ms = node.try_occupy_next(now, batch, self.count, self.occupy_timeout_ms);
            if wait_ms < self.occupy_timeout_ms {
                node.add_waiting_request(now + wait_ms, batch);
                node.add_occupied_pass(batch);
                std::thread::sleep(Duration::from_millis(wait_ms));
                return Verdict::PassAfter(Duration::from_millis(wait_ms));
            }
        }

        Verdict::Reject
    }
}
