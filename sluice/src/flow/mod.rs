//! Flow rules: the rule model, the per-resource rule manager and the checker
//! that resolves which statistic node a rule is evaluated against.

mod reject;
mod shaper;
mod throttling;
mod warm_up;
mod warm_up_throttling;

pub use reject::RejectShaper;
pub use shaper::{TrafficShaper, Verdict};
pub use throttling::ThrottlingShaper;
pub use warm_up::WarmUpShaper;
pub use warm_up_throttling::WarmUpThrottlingShaper;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{BlockError, RuleError};
use crate::listen::ListenerSet;
use crate::node::Node;
use crate::runtime::Shared;
use crate::slots::{Decision, Flight};

/// Matches every origin that has no origin-specific rule.
pub const LIMIT_ORIGIN_DEFAULT: &str = "default";
/// Matches origins not named by any other rule of the resource.
pub const LIMIT_ORIGIN_OTHER: &str = "other";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowGrade {
    /// Limit on live concurrency.
    Thread,
    /// Limit on passed requests per second.
    #[default]
    Qps,
}

/// How the rule relates to other resources when selecting its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationStrategy {
    #[default]
    Direct,
    /// Evaluate against the cluster node of `ref_resource`.
    Relate,
    /// Apply only when the context name equals `ref_resource`.
    Chain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlBehavior {
    #[default]
    Reject,
    WarmUp,
    Throttling,
    WarmUpThrottling,
}

/// A single flow-shaping rule for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowRule {
    pub resource: String,
    /// Origin filter: a specific origin name, `"default"` or `"other"`.
    pub limit_origin: String,
    pub grade: FlowGrade,
    pub count: f64,
    pub strategy: RelationStrategy,
    pub ref_resource: Option<String>,
    pub control_behavior: ControlBehavior,
    pub warm_up_period_sec: u32,
    pub max_queueing_time_ms: u32,
    pub cluster_mode: bool,
    pub cluster_flow_id: Option<u64>,
    /// On token-server failure, fall back to the local check instead of
    /// admitting outright.
    pub cluster_fallback_to_local: bool,
}

impl Default for FlowRule {
    fn default() -> Self {
        Self {
            resource: String::new(),
            limit_origin: LIMIT_ORIGIN_DEFAULT.to_owned(),
            grade: FlowGrade::Qps,
            count: 0.0,
            strategy: RelationStrategy::Direct,
            ref_resource: None,
            control_behavior: ControlBehavior::Reject,
            warm_up_period_sec: 10,
            max_queueing_time_ms: 500,
            cluster_mode: false,
            cluster_flow_id: None,
            cluster_fallback_to_local: true,
        }
    }
}

impl FlowRule {
    fn validate(&self) -> Result<(), RuleError> {
        if self.resource.is_empty() {
            return Err(RuleError::invalid("", "empty resource name"));
        }
        if !self.count.is_finite() || self.count < 0.0 {
            return Err(RuleError::invalid(&self.resource, "count must be >= 0"));
        }
        if self.limit_origin.is_empty() {
            return Err(RuleError::invalid(&self.resource, "empty limit origin"));
        }
        if matches!(
            self.control_behavior,
            ControlBehavior::WarmUp | ControlBehavior::WarmUpThrottling
        ) && self.warm_up_period_sec == 0
        {
            return Err(RuleError::invalid(
                &self.resource,
                "warm-up behavior requires a positive warm-up period",
            ));
        }
        if self.cluster_mode && self.cluster_flow_id.is_none() {
            return Err(RuleError::invalid(
                &self.resource,
                "cluster mode requires a flow id",
            ));
        }
        Ok(())
    }
}

/// A validated rule paired with the shaper instance that carries its pacing
/// state for the lifetime of the rule set.
#[derive(Debug)]
pub struct ActiveFlowRule {
    rule: Arc<FlowRule>,
    shaper: Box<dyn TrafficShaper>,
}

impl ActiveFlowRule {
    pub fn rule(&self) -> &Arc<FlowRule> {
        &self.rule
    }
}

fn build_shaper(rule: &FlowRule, clock: &Clock, config: &Config) -> Box<dyn TrafficShaper> {
    match rule.control_behavior {
        ControlBehavior::Reject => Box::new(RejectShaper::new(
            rule.grade,
            rule.count,
            config.occupy_timeout_ms,
            clock.clone(),
        )),
        ControlBehavior::Throttling => Box::new(ThrottlingShaper::new(
            rule.count,
            rule.max_queueing_time_ms,
            clock.clone(),
        )),
        ControlBehavior::WarmUp => Box::new(WarmUpShaper::new(
            rule.count,
            rule.warm_up_period_sec,
            config.cold_factor,
            clock.clone(),
        )),
        ControlBehavior::WarmUpThrottling => Box::new(WarmUpThrottlingShaper::new(
            rule.count,
            rule.warm_up_period_sec,
            config.cold_factor,
            rule.max_queueing_time_ms,
            clock.clone(),
        )),
    }
}

type FlowRuleMap = HashMap<Arc<str>, Vec<Arc<ActiveFlowRule>>>;

/// Holds the active flow rule set; `load_rules` swaps the whole set
/// atomically and keeps the previous set on any validation failure.
#[derive(Debug, Default)]
pub struct FlowRuleManager {
    rules: ArcSwap<FlowRuleMap>,
    listeners: ListenerSet<FlowRule>,
}

impl FlowRuleManager {
    pub(crate) fn load(
        &self,
        rules: Vec<FlowRule>,
        clock: &Clock,
        config: &Config,
    ) -> Result<(), RuleError> {
        let mut map: FlowRuleMap = HashMap::new();
        let mut flow_ids = HashSet::new();

        for rule in rules {
            rule.validate()?;
            if let Some(id) = rule.cluster_flow_id {
                if !flow_ids.insert(id) {
                    return Err(RuleError::DuplicateFlowId(id));
                }
            }
            let shaper = build_shaper(&rule, clock, config);
            let key: Arc<str> = Arc::from(rule.resource.as_str());
            map.entry(key).or_default().push(Arc::new(ActiveFlowRule {
                rule: Arc::new(rule),
                shaper,
            }));
        }

        self.rules.store(Arc::new(map));
        tracing::debug!(resources = self.rules.load().len(), "flow rules loaded");
        self.listeners.notify(&self.rules());
        Ok(())
    }

    /// Registers a callback invoked with the active set after every
    /// successful load.
    pub fn on_change(&self, listener: impl Fn(&[FlowRule]) + Send + Sync + 'static) {
        self.listeners.subscribe(listener);
    }

    pub(crate) fn rules_for(&self, resource: &str) -> Option<Vec<Arc<ActiveFlowRule>>> {
        self.rules.load().get(resource).cloned()
    }

    /// True when `origin` is not the named origin of any rule on `resource`.
    fn is_other_origin(&self, origin: &str, resource: &str) -> bool {
        match self.rules.load().get(resource) {
            Some(rules) => rules.iter().all(|r| r.rule.limit_origin != origin),
            None => true,
        }
    }

    pub fn rules(&self) -> Vec<FlowRule> {
        self.rules
            .load()
            .values()
            .flatten()
            .map(|active| (*active.rule).clone())
            .collect()
    }
}

/// Evaluates every flow rule of the flight's resource in order. The first
/// rejection wins; a delayed admission short-circuits the remaining rules.
pub(crate) fn check_flow(shared: &Shared, flight: &Flight<'_>) -> Decision {
    let Some(rules) = shared.flow_rules.rules_for(flight.resource.name()) else {
        return Decision::Admit;
    };

    for active in &rules {
        let verdict = if active.rule.cluster_mode {
            check_cluster(shared, active, flight)
        } else {
            check_local(shared, active, flight)
        };
        match verdict {
            Verdict::Pass => continue,
            Verdict::PassAfter(wait) => return Decision::AdmitAfter(wait),
            Verdict::Reject => {
                return Decision::Block(BlockError::Flow {
                    resource: Arc::clone(flight.resource.name()),
                    rule: Arc::clone(&active.rule),
                });
            }
        }
    }
    Decision::Admit
}

fn check_local(shared: &Shared, active: &ActiveFlowRule, flight: &Flight<'_>) -> Verdict {
    match select_node(shared, &active.rule, flight) {
        // No node to measure against means the rule cannot apply.
        None => Verdict::Pass,
        Some(node) => active
            .shaper
            .can_pass(node.as_ref(), flight.batch, flight.prioritized),
    }
}

fn check_cluster(shared: &Shared, active: &ActiveFlowRule, flight: &Flight<'_>) -> Verdict {
    use crate::cluster::TokenResult;

    let service = shared.token_service.read().clone();
    let Some(service) = service else {
        return fallback_to_local_or_pass(shared, active, flight);
    };
    let Some(flow_id) = active.rule.cluster_flow_id else {
        return fallback_to_local_or_pass(shared, active, flight);
    };

    match service.request_token(flow_id, flight.batch, flight.prioritized) {
        TokenResult::Ok => Verdict::Pass,
        TokenResult::ShouldWait { wait_ms } => {
            std::thread::sleep(Duration::from_millis(wait_ms));
            Verdict::Pass
        }
        TokenResult::Blocked => Verdict::Reject,
        TokenResult::NoRuleExists
        | TokenResult::BadRequest
        | TokenResult::Fail
        | TokenResult::TooManyRequests => {
            tracing::warn!(
                resource = %flight.resource,
                flow_id,
                "token server could not decide, falling back"
            );
            fallback_to_local_or_pass(shared, active, flight)
        }
    }
}

fn fallback_to_local_or_pass(
    shared: &Shared,
    active: &ActiveFlowRule,
    flight: &Flight<'_>,
) -> Verdict {
    if active.rule.cluster_fallback_to_local {
        check_local(shared, active, flight)
    } else {
        Verdict::Pass
    }
}

/// The node-selection table: which statistic node the rule is measured
/// against, given its origin filter, its relation strategy and the caller's
/// origin. `None` means the rule does not apply to this call.
fn select_node(
    shared: &Shared,
    rule: &FlowRule,
    flight: &Flight<'_>,
) -> Option<Arc<dyn Node>> {
    let limit = rule.limit_origin.as_str();
    let origin = flight.origin.as_deref();
    let origin_is_specific = origin
        .map(|o| o != LIMIT_ORIGIN_DEFAULT && o != LIMIT_ORIGIN_OTHER)
        .unwrap_or(false);

    if origin == Some(limit) && origin_is_specific {
        match rule.strategy {
            RelationStrategy::Direct => flight
                .origin_node
                .clone()
                .map(|n| n as Arc<dyn Node>),
            _ => select_reference_node(shared, rule, flight),
        }
    } else if limit == LIMIT_ORIGIN_DEFAULT {
        match rule.strategy {
            RelationStrategy::Direct => flight.cluster.clone().map(|n| n as Arc<dyn Node>),
            _ => select_reference_node(shared, rule, flight),
        }
    } else if limit == LIMIT_ORIGIN_OTHER
        && origin_is_specific
        && shared
            .flow_rules
            .is_other_origin(origin.unwrap_or_default(), flight.resource.name())
    {
        match rule.strategy {
            RelationStrategy::Direct => flight
                .origin_node
                .clone()
                .map(|n| n as Arc<dyn Node>),
            _ => select_reference_node(shared, rule, flight),
        }
    } else {
        None
    }
}

fn select_reference_node(
    shared: &Shared,
    rule: &FlowRule,
    flight: &Flight<'_>,
) -> Option<Arc<dyn Node>> {
    let ref_resource = rule.ref_resource.as_deref().filter(|r| !r.is_empty())?;

    match rule.strategy {
        RelationStrategy::Relate => shared
            .cluster_nodes
            .get(ref_resource)
            .map(|entry| Arc::clone(entry.value()) as Arc<dyn Node>),
        RelationStrategy::Chain => {
            if &*flight.context_name != ref_resource {
                return None;
            }
            flight.node.clone().map(|n| n as Arc<dyn Node>)
        }
        RelationStrategy::Direct => None,
    }
}
