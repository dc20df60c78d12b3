use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::clock::Clock;
use crate::flow::shaper::{TrafficShaper, Verdict};
use crate::flow::warm_up::WarmUpState;
use crate::node::Node;

const NEVER_PASSED: i64 = i64::MIN / 4;

/// Warm-up combined with strict pacing: the warm-up curve supplies the
/// instantaneous permitted rate, and requests are then spaced out against
/// that rate like the throttling shaper, queueing up to `max_queueing_ms`.
#[derive(Debug)]
pub struct WarmUpThrottlingShaper {
    state: WarmUpState,
    max_queueing_ms: i64,
    latest_passed_ms: AtomicI64,
    clock: Clock,
}

impl WarmUpThrottlingShaper {
    pub fn new(
        count: f64,
        warm_up_period_sec: u32,
        cold_factor: u32,
        max_queueing_ms: u32,
        clock: Clock,
    ) -> Self {
        Self {
            state: WarmUpState::new(count, warm_up_period_sec, cold_factor),
            max_queueing_ms: max_queueing_ms as i64,
            latest_passed_ms: AtomicI64::new(NEVER_PASSED),
            clock,
        }
    }
}

impl TrafficShaper for WarmUpThrottlingShaper {
    fn can_pass(&self, node: &dyn Node, batch: u32, _prioritized: bool) -> Verdict {
        if batch == 0 {
            return Verdict::Pass;
        }

        let previous_qps = node.previous_pass_qps() as i64;
        let now = self.clock.now_ms();
        self.state.sync_token(previous_qps, now);
        let now = now as i64;

        let rest_token = self.state.stored();
        let rate = if rest_token >= self.state.warning_token() {
            let above_token = rest_token - self.state.warning_token();
            self.state.warming_qps(above_token)
        } else {
            self.state.count()
        };
        let cost_ms = (batch as f64 / rate * 1_000.0).round() as i64;

        let expected = cost_ms + self.latest_passed_ms.load(Ordering::Acquire);
        if expected <= now {
            self.latest_passed_ms.store(now, Ordering::Release);
            return Verdict::Pass;
        }

        let wait_ms = cost_ms + self.latest_passed_ms.load(Ordering::Acquire)
            - self.clock.now_ms() as i64;
        if wait_ms > self.max_queueing_ms {
            return Verdict::Reject;
        }

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
