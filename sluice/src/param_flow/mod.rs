//! Hot-parameter throttling: per-(resource, argument-slot) sliding counters
//! keyed by argument value, with bounded LRU eviction and per-value
//! thresholds.

mod cache;
mod metric;

pub use metric::{
    HotParameterRing, ParamEvent, ParamMapBucket, ParameterMetric, PARAM_BUCKET_CAPACITY,
    THREAD_COUNT_CAPACITY,
};

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::error::RuleError;
use crate::flow::{ControlBehavior, FlowGrade};
use crate::listen::ListenerSet;
use crate::param::ParamValue;

/// A specific argument value with its own threshold, overriding the rule
/// count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamFlowItem {
    pub value: ParamValue,
    pub threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamFlowRule {
    pub resource: String,
    /// Index of the gated argument slot.
    pub param_idx: usize,
    pub grade: FlowGrade,
    pub count: f64,
    pub exclusion_items: Vec<ParamFlowItem>,
    pub control_behavior: ControlBehavior,
    pub max_queueing_time_ms: u32,
}

impl Default for ParamFlowRule {
    fn default() -> Self {
        Self {
            resource: String::new(),
            param_idx: 0,
            grade: FlowGrade::Qps,
            count: 0.0,
            exclusion_items: Vec::new(),
            control_behavior: ControlBehavior::Reject,
            max_queueing_time_ms: 0,
        }
    }
}

impl ParamFlowRule {
    fn validate(&self) -> Result<(), RuleError> {
        if self.resource.is_empty() {
            return Err(RuleError::invalid("", "empty resource name"));
        }
        if !self.count.is_finite() || self.count < 0.0 {
            return Err(RuleError::invalid(&self.resource, "count must be >= 0"));
        }
        Ok(())
    }
}

/// A validated rule with its exclusion items parsed into a lookup map.
#[derive(Debug)]
pub struct ActiveParamRule {
    rule: Arc<ParamFlowRule>,
    hot_items: HashMap<ParamValue, u32>,
}

impl ActiveParamRule {
    pub fn rule(&self) -> &Arc<ParamFlowRule> {
        &self.rule
    }
}

type ParamRuleMap = HashMap<Arc<str>, Vec<Arc<ActiveParamRule>>>;

#[derive(Debug, Default)]
pub struct ParamFlowRuleManager {
    rules: ArcSwap<ParamRuleMap>,
    listeners: ListenerSet<ParamFlowRule>,
}

impl ParamFlowRuleManager {
    pub fn on_change(&self, listener: impl Fn(&[ParamFlowRule]) + Send + Sync + 'static) {
        self.listeners.subscribe(listener);
    }

    pub(crate) fn load(&self, rules: Vec<ParamFlowRule>) -> Result<(), RuleError> {
        let mut map: ParamRuleMap = HashMap::new();
        for rule in rules {
            rule.validate()?;
            if rule.control_behavior != ControlBehavior::Reject {
                tracing::warn!(
                    resource = rule.resource,
                    "only the reject behavior applies to hot parameters; treating as reject"
                );
            }
            let hot_items = rule
                .exclusion_items
                .iter()
                .map(|item| (item.value.clone(), item.threshold))
                .collect();
            let key: Arc<str> = Arc::from(rule.resource.as_str());
            map.entry(key).or_default().push(Arc::new(ActiveParamRule {
                rule: Arc::new(rule),
                hot_items,
            }));
        }
        self.rules.store(Arc::new(map));
        self.listeners.notify(&self.rules());
        Ok(())
    }

    pub(crate) fn rules_for(&self, resource: &str) -> Option<Vec<Arc<ActiveParamRule>>> {
        self.rules.load().get(resource).cloned()
    }

    pub(crate) fn has_rules(&self, resource: &str) -> bool {
        self.rules.load().contains_key(resource)
    }

    pub fn rules(&self) -> Vec<ParamFlowRule> {
        self.rules
            .load()
            .values()
            .flatten()
            .map(|active| (*active.rule).clone())
            .collect()
    }
}

/// Checks one rule against the call's arguments. Returns the first offending
/// value, or `None` when the call may pass. A missing or unhashable slot
/// admits; list arguments are flattened and every contained value must pass.
pub(crate) fn pass_check(
    metric: &ParameterMetric,
    active: &ActiveParamRule,
    batch: u32,
    args: &[ParamValue],
) -> Option<ParamValue> {
    let rule = &active.rule;
    let value = args.get(rule.param_idx)?;

    match value {
        ParamValue::List(values) => values
            .iter()
            .find(|v| !pass_single_value(metric, active, batch, v))
            .cloned(),
        scalar => {
            if pass_single_value(metric, active, batch, scalar) {
                None
            } else {
                Some(scalar.clone())
            }
        }
    }
}

fn pass_single_value(
    metric: &ParameterMetric,
    active: &ActiveParamRule,
    batch: u32,
    value: &ParamValue,
) -> bool {
    let rule = &active.rule;
    match rule.grade {
        FlowGrade::Qps => {
            let cur = metric.pass_param_qps(rule.param_idx, value);
            if let Some(&threshold) = active.hot_items.get(value) {
                return cur + batch as f64 <= threshold as f64;
            }
            if cur + batch as f64 > rule.count {
                // Historical quirk kept on purpose: a fractional overshoot of
                // less than one whole request is still admitted.
                let overshoot = cur - rule.count;
                if overshoot > 0.0 && overshoot < 1.0 {
                    return true;
                }
                return false;
            }
            true
        }
        FlowGrade::Thread => {
            let threads = metric.thread_count(rule.param_idx, value);
            let threshold = match active.hot_items.get(value) {
                Some(&t) => t as i64,
                None => rule.count as i64,
            };
            threads + 1 <= threshold
        }
    }
}
