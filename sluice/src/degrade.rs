//! Circuit breaking: per-rule breaker state evaluated against the resource's
//! cluster node, with a one-shot timer re-closing the circuit after the
//! configured window.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::error::RuleError;
use crate::listen::ListenerSet;
use crate::node::{ClusterNode, Node};
use crate::timer::Timer;

/// Consecutive slow calls tolerated before an RT rule trips.
const RT_MAX_EXCEED: u64 = 5;
/// Minimum traffic before the exception-ratio rule engages.
const RATIO_MIN_QPS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeGrade {
    /// Average response time in milliseconds.
    #[default]
    AvgRt,
    /// Exceptions per successful call over the last second.
    ExceptionRatio,
    /// Total exceptions over the last minute.
    ExceptionCount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradeRule {
    pub resource: String,
    pub grade: DegradeGrade,
    pub count: f64,
    pub time_window_sec: u32,
}

impl Default for DegradeRule {
    fn default() -> Self {
        Self {
            resource: String::new(),
            grade: DegradeGrade::AvgRt,
            count: 0.0,
            time_window_sec: 0,
        }
    }
}

impl DegradeRule {
    fn validate(&self) -> Result<(), RuleError> {
        if self.resource.is_empty() {
            return Err(RuleError::invalid("", "empty resource name"));
        }
        if !self.count.is_finite() || self.count < 0.0 {
            return Err(RuleError::invalid(&self.resource, "count must be >= 0"));
        }
        if self.grade == DegradeGrade::ExceptionRatio && self.count > 1.0 {
            return Err(RuleError::invalid(
                &self.resource,
                "exception ratio must lie in [0, 1]",
            ));
        }
        if self.time_window_sec == 0 {
            return Err(RuleError::invalid(
                &self.resource,
                "time window must be positive",
            ));
        }
        Ok(())
    }
}

/// Live breaker state for one rule.
#[derive(Debug)]
pub(crate) struct Breaker {
    rule: Arc<DegradeRule>,
    cut: Arc<AtomicBool>,
    consecutive_slow: Arc<AtomicU64>,
}

impl Breaker {
    fn new(rule: DegradeRule) -> Self {
        Self {
            rule: Arc::new(rule),
            cut: Arc::new(AtomicBool::new(false)),
            consecutive_slow: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn rule(&self) -> &Arc<DegradeRule> {
        &self.rule
    }

    /// One admission check. `false` trips or keeps the circuit open; all
    /// calls are rejected until the window timer re-closes it.
    pub fn try_pass(&self, cluster: &ClusterNode, timer: &Timer) -> bool {
        if self.cut.load(Ordering::Acquire) {
            return false;
        }

        match self.rule.grade {
            DegradeGrade::AvgRt => {
                if cluster.avg_rt() < self.rule.count {
                    self.consecutive_slow.store(0, Ordering::Release);
                    return true;
                }
                // The first few slow observations are tolerated.
                if self.consecutive_slow.fetch_add(1, Ordering::AcqRel) + 1 < RT_MAX_EXCEED {
                    return true;
                }
            }
            DegradeGrade::ExceptionRatio => {
                let exception = cluster.exception_qps();
                let success = cluster.success_qps();
                let total = cluster.total_qps();
                if total < RATIO_MIN_QPS {
                    return true;
                }
                let real_success = success - exception;
                if real_success <= 0.0 && exception < RATIO_MIN_QPS {
                    return true;
                }
                if exception / success < self.rule.count {
                    return true;
                }
            }
            DegradeGrade::ExceptionCount => {
                if (cluster.total_exception() as f64) < self.rule.count {
                    return true;
                }
            }
        }

        self.trip(timer);
        false
    }

    fn trip(&self, timer: &Timer) {
        if self
            .cut
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::debug!(resource = %self.rule.resource, window_sec = self.rule.time_window_sec, "circuit opened");
            let cut = Arc::clone(&self.cut);
            let consecutive = Arc::clone(&self.consecutive_slow);
            timer.schedule_once(
                Duration::from_secs(self.rule.time_window_sec as u64),
                move || {
                    consecutive.store(0, Ordering::Release);
                    cut.store(false, Ordering::Release);
                },
            );
        }
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        self.cut.load(Ordering::Acquire)
    }
}

type BreakerMap = HashMap<Arc<str>, Vec<Arc<Breaker>>>;

#[derive(Debug, Default)]
pub struct DegradeRuleManager {
    breakers: ArcSwap<BreakerMap>,
    listeners: ListenerSet<DegradeRule>,
}

impl DegradeRuleManager {
    pub(crate) fn load(&self, rules: Vec<DegradeRule>) -> Result<(), RuleError> {
        let mut map: BreakerMap = HashMap::new();
        for rule in rules {
            rule.validate()?;
            let key: Arc<str> = Arc::from(rule.resource.as_str());
            map.entry(key)
                .or_default()
                .push(Arc::new(Breaker::new(rule)));
        }
        self.breakers.store(Arc::new(map));
        self.listeners.notify(&self.rules());
        Ok(())
    }

    pub fn on_change(&self, listener: impl Fn(&[DegradeRule]) + Send + Sync + 'static) {
        self.listeners.subscribe(listener);
    }

    pub(crate) fn breakers_for(&self, resource: &str) -> Option<Vec<Arc<Breaker>>> {
        self.breakers.load().get(resource).cloned()
    }

    pub fn rules(&self) -> Vec<DegradeRule> {
        self.breakers
            .load()
            .values()
            .flatten()
            .map(|b| (*b.rule).clone())
            .collect()
    }
}
