use std::sync::Arc;

use crate::authority::AuthorityRule;
use crate::degrade::DegradeRule;
use crate::flow::FlowRule;
use crate::param::ParamValue;
use crate::param_flow::ParamFlowRule;
use crate::system::SystemGate;

/// Admission denial raised by a checker stage.
///
/// Each variant carries the rule that triggered it so callers can report the
/// exact configuration that rejected the invocation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BlockError {
    /// A flow rule rejected the call.
    #[error("flow limit exceeded on `{resource}`")]
    Flow {
        resource: Arc<str>,
        rule: Arc<FlowRule>,
    },

    /// The circuit for the resource is open.
    #[error("circuit open on `{resource}`")]
    Degrade {
        resource: Arc<str>,
        rule: Arc<DegradeRule>,
    },

    /// The calling origin is denied by a white/black list.
    #[error("origin `{origin}` denied on `{resource}`")]
    Authority {
        resource: Arc<str>,
        origin: Arc<str>,
        rule: Arc<AuthorityRule>,
    },

    /// A hot parameter value exceeded its per-value threshold.
    #[error("hot parameter `{value}` throttled on `{resource}`")]
    ParamFlow {
        resource: Arc<str>,
        value: ParamValue,
        rule: Arc<ParamFlowRule>,
    },

    /// Process-wide system protection triggered.
    #[error("system protection triggered on `{resource}`: {gate}")]
    System { resource: Arc<str>, gate: SystemGate },
}

impl BlockError {
    /// Name of the resource the block was raised for.
    pub fn resource(&self) -> &str {
        match self {
            Self::Flow { resource, .. }
            | Self::Degrade { resource, .. }
            | Self::Authority { resource, .. }
            | Self::ParamFlow { resource, .. }
            | Self::System { resource, .. } => resource,
        }
    }

    /// Short tag used by the block log.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Flow { .. } => "flow",
            Self::Degrade { .. } => "degrade",
            Self::Authority { .. } => "authority",
            Self::ParamFlow { .. } => "param-flow",
            Self::System { .. } => "system",
        }
    }
}

/// Rejection of a whole rule set handed to a rule manager.
///
/// Managers are all-or-nothing: one invalid rule keeps the previously active
/// set in place.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuleError {
    #[error("invalid rule for `{resource}`: {reason}")]
    Invalid { resource: String, reason: String },

    #[error("duplicate cluster flow id {0}")]
    DuplicateFlowId(u64),
}

impl RuleError {
    pub(crate) fn invalid(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            resource: resource.into(),
            reason: reason.into(),
        }
    }
}
