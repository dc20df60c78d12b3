//! # sluice
//!
//! `sluice` is an in-process traffic-governance library: for every attempted
//! invocation of a named resource it decides whether the call is admitted,
//! queued or rejected under the active rules — flow shaping, circuit
//! breaking, hot-parameter throttling and origin-based authority.
//!
//! ## Core Philosophy
//!
//! Many threads cross the admission pipeline on every request, so the hot
//! path must never take a lock. Measurement runs on a sliding window of
//! atomically updated buckets with lazy CAS reset; rule sets are swapped in
//! whole behind a lock-free reference; only the queueing shapers ever sleep,
//! and only on the calling thread, bounded by the rule's queueing timeout.
//!
//! ## Key Concepts
//!
//! * **Resource**: a named point in code that admission is gated at.
//! * **Context / Entry**: per-thread invocation scope and one live
//!   acquisition within it; entries nest and exit in reverse order.
//! * **Slot chain**: the ordered admission pipeline. Assembler stages
//!   resolve statistic nodes, the statistic stage records outcomes, checker
//!   stages decide.
//! * **Node tree**: per-(context, resource) nodes under each context's
//!   entrance, with a process-wide cluster node per resource and per-origin
//!   sub-nodes.
//!
//! ## Example
//!
//! ```rust
//! use sluice::{FlowRule, Sluice};
//!
//! let sluice = Sluice::new();
//! sluice
//!     .load_flow_rules(vec![FlowRule {
//!         resource: "orders".into(),
//!         count: 100.0,
//!         ..FlowRule::default()
//!     }])
//!     .unwrap();
//!
//! match sluice.entry("orders") {
//!     Ok(entry) => {
//!         // guarded work here
//!         entry.exit();
//!     }
//!     Err(blocked) => {
//!         let _ = blocked; // shed load, serve a fallback, etc.
//!     }
//! }
//! ```

mod authority;
mod clock;
mod cluster;
mod config;
mod context;
mod datasource;
mod degrade;
mod entry;
mod error;
mod flow;
mod listen;
mod metric_log;
mod node;
mod param;
mod param_flow;
mod resource;
mod runtime;
mod slots;
mod stat;
mod system;
mod timer;

pub use authority::{AuthorityRule, AuthorityRuleManager, AuthorityStrategy};
pub use clock::Clock;
pub use cluster::{TokenResult, TokenService};
pub use config::Config;
pub use context::{Context, DEFAULT_CONTEXT_NAME};
pub use datasource::{ConvertError, Converter, FileRuleSource, JsonArrayConverter, RuleSink};
pub use degrade::{DegradeGrade, DegradeRule, DegradeRuleManager};
pub use entry::Entry;
pub use error::{BlockError, RuleError};
pub use flow::{
    ControlBehavior, FlowGrade, FlowRule, FlowRuleManager, RejectShaper, RelationStrategy,
    ThrottlingShaper, TrafficShaper, Verdict, WarmUpShaper, WarmUpThrottlingShaper,
    LIMIT_ORIGIN_DEFAULT, LIMIT_ORIGIN_OTHER,
};
pub use metric_log::MetricLine;
pub use node::{ClusterNode, DefaultNode, Node, NodeKind, StatisticNode};
pub use param::ParamValue;
pub use param_flow::{
    HotParameterRing, ParamEvent, ParamFlowItem, ParamFlowRule, ParamFlowRuleManager,
    ParamMapBucket, ParameterMetric, PARAM_BUCKET_CAPACITY, THREAD_COUNT_CAPACITY,
};
pub use resource::{Resource, TrafficType};
pub use runtime::{EntryArgs, Sluice};
pub use stat::{ArrayMetric, LeapArray, MetricBucket, MetricSnapshot, WindowBucket, WindowSlot};
pub use system::{NoopProbe, SystemGate, SystemProbe, SystemRule, SystemRuleManager};
