use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::clock::Clock;
use crate::flow::shaper::{TrafficShaper, Verdict};
use crate::node::Node;

/// Far enough in the past that the first request after construction is always
/// admitted immediately, but safe against overflow when a cost is added.
const NEVER_PASSED: i64 = i64::MIN / 4;

/// Leaky-bucket shaping with strict pacing: requests pass at a fixed spacing
/// of `1000 / count` milliseconds, queueing in line (sleeping on the calling
/// thread) up to `max_queueing_ms`.
///
/// After a long idle period the first arrivals all see an expected time in
/// the past and pass at once; steady pacing resumes from there. That head
/// burst is a property of the algorithm, not a bug.
#[derive(Debug)]
pub struct ThrottlingShaper {
    count: f64,
    max_queueing_ms: i64,
    latest_passed_ms: AtomicI64,
    clock: Clock,
}

impl ThrottlingShaper {
    pub fn new(count: f64, max_queueing_ms: u32, clock: Clock) -> Self {
        Self {
            count,
            max_queueing_ms: max_queueing_ms as i64,
            latest_passed_ms: AtomicI64::new(NEVER_PASSED),
            clock,
        }
    }
}

impl TrafficShaper for ThrottlingShaper {
    fn can_pass(&self, _node: &dyn Node, batch: u32, _prioritized: bool) -> Verdict {
        if batch == 0 {
            return Verdict::Pass;
        }
        // A non-positive rate would produce an unbounded cost below.
        if self.count <= 0.0 {
            return Verdict::Reject;
        }

        let now = self.clock.now_ms() as i64;
        let cost_ms = (batch as f64 / self.count * 1_000.0).round() as i64;
        let expected = cost_ms + self.latest_passed_ms.load(Ordering::Acquire);

        if expected <= now {
            // Contention here may briefly admit more than the pace; accepted.
            self.latest_passed_ms.store(now, Ordering::Release);
            return Verdict::Pass;
        }

        let wait_ms = cost_ms + self.latest_passed_ms.load(Ordering::Acquire)
            - self.clock.now_ms() as i64;
        if wait_ms > self.max_queueing_ms {
            return Verdict::Reject;
        }

        // Claim a place in line, then re-check: a racing claimer may have
        // pushed our slot past the queueing bound.
        let slot = self.latest_passed_ms.fetch_add(cost_ms, Ordering::AcqRel) + cost_ms;
        let wait_ms = slot - self.clock.now_ms() as i64;
        if wait_ms > self.max_queueing_ms {
            self.latest_passed_ms.fetch_sub(cost_ms, Ordering::AcqRel);
            return Verdict::Reject;
        }
        if wait_ms > 0 {
            std::thread::sleep(Duration::from_millis(wait_ms as u64));
        }
        Verdict::Pass
    }
}
