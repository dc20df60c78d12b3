//! The admission pipeline: an ordered chain of stages sharing the entry/exit
//! lifecycle. Assembler stages resolve nodes, the statistic stage records
//! outcomes around the downstream result, and checker stages decide.

mod authority_slot;
mod cluster_builder;
mod degrade_slot;
mod flow_slot;
mod log_slot;
mod node_selector;
mod param_flow_slot;
mod statistic_slot;
mod system_slot;

use std::sync::Arc;
use std::time::Duration;

use crate::error::BlockError;
use crate::node::{ClusterNode, DefaultNode, StatisticNode};
use crate::param::ParamValue;
use crate::resource::Resource;
use crate::runtime::Shared;

/// Outcome of the admission pipeline for one acquisition.
#[derive(Debug, Clone)]
pub(crate) enum Decision {
    Admit,
    /// Admitted after the caller already slept, borrowing future capacity.
    AdmitAfter(Duration),
    Block(BlockError),
}

/// Mutable state threaded through the chain on entry. Assembler stages fill
/// in the node fields; checker stages read them.
pub(crate) struct Flight<'a> {
    pub shared: &'a Shared,
    pub resource: &'a Resource,
    pub batch: u32,
    pub prioritized: bool,
    pub args: &'a [ParamValue],
    pub context_name: Arc<str>,
    pub origin: Option<Arc<str>>,
    pub entrance: Arc<DefaultNode>,
    pub parent_node: Option<Arc<DefaultNode>>,
    pub node: Option<Arc<DefaultNode>>,
    pub origin_node: Option<Arc<StatisticNode>>,
    pub cluster: Option<Arc<ClusterNode>>,
    /// Set by the param-flow stage when it booked live thread counts for the
    /// call's argument values; the exit decrement mirrors it exactly.
    pub param_thread_counted: bool,
}

/// State available while unwinding the chain on exit.
pub(crate) struct Departure<'a> {
    pub shared: &'a Shared,
    pub resource: &'a Resource,
    pub batch: u32,
    pub args: &'a [ParamValue],
    pub node: &'a Arc<DefaultNode>,
    pub origin_node: Option<&'a Arc<StatisticNode>>,
    pub cluster: Option<&'a Arc<ClusterNode>>,
    pub rt_ms: u64,
    pub error: Option<&'a str>,
    /// Whether this entry was counted into the live thread numbers.
    pub thread_counted: bool,
    /// Whether this entry was counted into the per-value thread numbers.
    pub param_thread_counted: bool,
}

/// One pipeline stage. `enter` receives the continuation of the chain and
/// may refuse to call it; `exit` runs during the reverse unwind.
pub(crate) trait Slot: Send + Sync {
    fn enter(&self, flight: &mut Flight<'_>, next: Next<'_>) -> Decision;

    fn exit(&self, _departure: &Departure<'_>) {}
}

/// Continuation over the remaining stages of the chain.
pub(crate) struct Next<'a> {
    rest: &'a [Box<dyn Slot>],
}

impl Next<'_> {
    pub fn run(self, flight: &mut Flight<'_>) -> Decision {
        match self.rest.split_first() {
            Some((slot, rest)) => slot.enter(flight, Next { rest }),
            None => Decision::Admit,
        }
    }
}

pub(crate) fn run_chain(chain: &[Box<dyn Slot>], flight: &mut Flight<'_>) -> Decision {
    Next { rest: chain }.run(flight)
}

pub(crate) fn unwind_chain(chain: &[Box<dyn Slot>], departure: &Departure<'_>) {
    for slot in chain.iter().rev() {
        slot.exit(departure);
    }
}

/// The canonical stage order.
pub(crate) fn build_chain() -> Vec<Box<dyn Slot>> {
    vec![
        Box::new(node_selector::NodeSelectorSlot),
        Box::new(cluster_builder::ClusterBuilderSlot),
        Box::new(log_slot::LogSlot),
        Box::new(statistic_slot::StatisticSlot),
        Box::new(authority_slot::AuthoritySlot),
        Box::new(system_slot::SystemSlot),
        Box::new(param_flow_slot::ParamFlowSlot),
        Box::new(flow_slot::FlowSlot),
        Box::new(degrade_slot::DegradeSlot),
    ]
}
