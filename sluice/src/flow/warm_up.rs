use std::sync::atomic::{AtomicI64, Ordering};

use crate::clock::Clock;
use crate::flow::shaper::{TrafficShaper, Verdict};
use crate::node::Node;

/// Token-ramp state shared by the warm-up shapers.
///
/// Models the Guava-style warm-up curve: a reservoir of `max_token` stored
/// permits drains towards `warning_token` as traffic arrives; while the
/// reservoir sits above the warning line the allowed rate climbs along a
/// linear slope from `count / cold_factor` up to `count`.
#[derive(Debug)]
pub(crate) struct WarmUpState {
    count: f64,
    cold_factor: u32,
    warning_token: i64,
    max_token: i64,
    slope: f64,
    stored_tokens: AtomicI64,
    last_filled_ms: AtomicI64,
}

impl WarmUpState {
    pub fn new(count: f64, warm_up_period_sec: u32, cold_factor: u32) -> Self {
        let period = warm_up_period_sec as f64;
        let cold = cold_factor as f64;

        let warning_token = (period * count / (cold - 1.0)) as i64;
        let max_token = warning_token + (2.0 * period * count / (1.0 + cold)) as i64;
        let slope = (cold - 1.0) / count / (max_token - warning_token) as f64;

        Self {
            count,
            cold_factor,
            warning_token,
            max_token,
            slope,
            // A fresh shaper is fully cold: the reservoir starts at the top.
            stored_tokens: AtomicI64::new(max_token),
            last_filled_ms: AtomicI64::new(0),
        }
    }

    #[inline]
    pub fn count(&self) -> f64 {
        self.count
    }

    #[inline]
    pub fn warning_token(&self) -> i64 {
        self.warning_token
    }

    #[inline]
    pub fn stored(&self) -> i64 {
        self.stored_tokens.load(Ordering::Acquire)
    }

    /// The permitted rate while `above_token` permits sit above the warning
    /// line; approaches `count` as the reservoir drains to the line.
    #[inline]
    pub fn warming_qps(&self, above_token: i64) -> f64 {
        1.0 / (above_token as f64 * self.slope + 1.0 / self.count)
    }

    /// Once per wall second: refill the reservoir for elapsed quiet time and
    /// drain the previous second's observed traffic.
    pub fn sync_token(&self, previous_pass_qps: i64, now_ms: u64) {
        let current = (now_ms - now_ms % 1_000) as i64;
        let old_last = self.last_filled_ms.load(Ordering::Acquire);
        if current <= old_last {
            return;
        }

        let old_value = self.stored_tokens.load(Ordering::Acquire);
        let new_value = self.cool_down_tokens(current, previous_pass_qps);
        if self
            .stored_tokens
            .compare_exchange(old_value, new_value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if self.stored_tokens.fetch_sub(previous_pass_qps, Ordering::AcqRel)
                - previous_pass_qps
                < 0
            {
                self.stored_tokens.store(0, Ordering::Release);
            }
            self.last_filled_ms.store(current, Ordering::Release);
        }
    }

    fn cool_down_tokens(&self, current_ms: i64, previous_pass_qps: i64) -> i64 {
        let old_value = self.stored_tokens.load(Ordering::Acquire);
        let last = self.last_filled_ms.load(Ordering::Acquire);
        let refilled = (old_value as f64 + (current_ms - last) as f64 * self.count / 1_000.0) as i64;

        let new_value = if old_value < self.warning_token {
            refilled
        } else if old_value > self.warning_token
            && previous_pass_qps < (self.count / self.cold_factor as f64) as i64
        {
            // Above the warning line the reservoir only refills while the
            // system is quiet; sustained traffic keeps draining it.
            refilled
        } else {
            old_value
        };
        new_value.min(self.max_token)
    }
}

/// Warm-up (cold start) shaping: after an idle spell the permitted rate
/// starts at `count / cold_factor` and ramps up to `count` over the
/// configured warm-up period.
#[derive(Debug)]
pub struct WarmUpShaper {
    state: WarmUpState,
    clock: Clock,
}

impl WarmUpShaper {
    pub fn new(count: f64, warm_up_period_sec: u32, cold_factor: u32, clock: Clock) -> Self {
        Self {
            state: WarmUpState::new(count, warm_up_period_sec, cold_factor),
            clock,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &WarmUpState {
        &self.state
    }
}

impl TrafficShaper for WarmUpShaper {
    fn can_pass(&self, node: &dyn Node, batch: u32, _prioritized: bool) -> Verdict {
        let pass_qps = node.pass_qps() as i64;
        let previous_qps = node.previous_pass_qps() as i64;
        self.state.sync_token(previous_qps, self.clock.now_ms());

        let rest_token = self.state.stored();
        if rest_token >= self.state.warning_token() {
            let above_token = rest_token - self.state.warning_token();
            let warning_qps = self.state.warming_qps(above_token);
            if (pass_qps + batch as i64) as f64 <= warning_qps {
                return Verdict::Pass;
            }
        } else if (pass_qps + batch as i64) as f64 <= self.state.count() {
            return Verdict::Pass;
        }

        Verdict::Reject
    }
}
