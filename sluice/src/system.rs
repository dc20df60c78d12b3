//! Process-wide system protection for inbound traffic: thresholds on global
//! QPS, concurrency, average RT, system load and CPU usage, evaluated against
//! the process-wide inbound aggregate.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::error::RuleError;
use crate::listen::ListenerSet;
use crate::node::{ClusterNode, Node};

/// Which system threshold rejected the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemGate {
    Qps,
    Concurrency,
    AvgRt,
    Load,
    CpuUsage,
}

impl fmt::Display for SystemGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Qps => "qps",
            Self::Concurrency => "concurrency",
            Self::AvgRt => "rt",
            Self::Load => "load",
            Self::CpuUsage => "cpu",
        };
        f.write_str(name)
    }
}

/// Source of machine-level readings. The default probe reports nothing,
/// leaving the load and CPU gates inactive until the embedding application
/// installs a real probe.
pub trait SystemProbe: Send + Sync + std::fmt::Debug {
    fn system_load(&self) -> Option<f64>;
    fn cpu_usage(&self) -> Option<f64>;
}

#[derive(Debug, Default)]
pub struct NoopProbe;

impl SystemProbe for NoopProbe {
    fn system_load(&self) -> Option<f64> {
        None
    }
    fn cpu_usage(&self) -> Option<f64> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemRule {
    pub highest_system_load: Option<f64>,
    pub highest_cpu_usage: Option<f64>,
    pub qps: Option<f64>,
    pub max_thread: Option<i64>,
    pub avg_rt_ms: Option<f64>,
}

impl SystemRule {
    fn validate(&self) -> Result<(), RuleError> {
        let negative = self.highest_system_load.is_some_and(|v| v < 0.0)
            || self.highest_cpu_usage.is_some_and(|v| !(0.0..=1.0).contains(&v))
            || self.qps.is_some_and(|v| v < 0.0)
            || self.max_thread.is_some_and(|v| v < 0)
            || self.avg_rt_ms.is_some_and(|v| v < 0.0);
        if negative {
            return Err(RuleError::invalid("system", "threshold out of range"));
        }
        Ok(())
    }
}

/// The tightest threshold per dimension across the loaded rules.
#[derive(Debug, Clone, Default, PartialEq)]
struct SystemThresholds {
    load: Option<f64>,
    cpu: Option<f64>,
    qps: Option<f64>,
    max_thread: Option<i64>,
    avg_rt: Option<f64>,
}

fn tighter<T: PartialOrd + Copy>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if x < y { x } else { y }),
        (x, None) => x,
        (None, y) => y,
    }
}

#[derive(Debug, Default)]
pub struct SystemRuleManager {
    rules: ArcSwap<Vec<SystemRule>>,
    thresholds: ArcSwap<SystemThresholds>,
    listeners: ListenerSet<SystemRule>,
}

impl SystemRuleManager {
    pub(crate) fn load(&self, rules: Vec<SystemRule>) -> Result<(), RuleError> {
        let mut agg = SystemThresholds::default();
        for rule in &rules {
            rule.validate()?;
            agg.load = tighter(agg.load, rule.highest_system_load);
            agg.cpu = tighter(agg.cpu, rule.highest_cpu_usage);
            agg.qps = tighter(agg.qps, rule.qps);
            agg.max_thread = tighter(agg.max_thread, rule.max_thread);
            agg.avg_rt = tighter(agg.avg_rt, rule.avg_rt_ms);
        }
        self.rules.store(Arc::new(rules));
        self.thresholds.store(Arc::new(agg));
        self.listeners.notify(&self.rules());
        Ok(())
    }

    pub fn on_change(&self, listener: impl Fn(&[SystemRule]) + Send + Sync + 'static) {
        self.listeners.subscribe(listener);
    }

    pub fn rules(&self) -> Vec<SystemRule> {
        self.rules.load().as_ref().clone()
    }

    /// Gate an inbound acquisition of `batch` permits against the global
    /// inbound statistics. Returns the violated gate, if any.
    pub(crate) fn check(
        &self,
        inbound: &ClusterNode,
        batch: u32,
        probe: &dyn SystemProbe,
    ) -> Option<SystemGate> {
        let thresholds = self.thresholds.load();

        if let Some(qps) = thresholds.qps {
            if inbound.pass_qps() + batch as f64 > qps {
                return Some(SystemGate::Qps);
            }
        }
        if let Some(max_thread) = thresholds.max_thread {
            if inbound.cur_thread_num() > max_thread {
                return Some(SystemGate::Concurrency);
            }
        }
        if let Some(avg_rt) = thresholds.avg_rt {
            if inbound.avg_rt() > avg_rt {
                return Some(SystemGate::AvgRt);
            }
        }
        if let Some(load_cap) = thresholds.load {
            if probe.system_load().is_some_and(|load| load > load_cap)
                && !bbr_ok(inbound)
            {
                return Some(SystemGate::Load);
            }
        }
        if let Some(cpu_cap) = thresholds.cpu {
            if probe.cpu_usage().is_some_and(|cpu| cpu > cpu_cap) {
                return Some(SystemGate::CpuUsage);
            }
        }
        None
    }
}

/// BBR-style relief valve: under high load, traffic still passes while the
/// live concurrency stays within the estimated bandwidth-delay product.
fn bbr_ok(inbound: &ClusterNode) -> bool {
    let current_thread = inbound.cur_thread_num();
    if current_thread > 1 {
        let bdp = inbound.max_success_qps() * inbound.min_rt() / 1_000.0;
        current_thread as f64 <= bdp
    } else {
        true
    }
}
