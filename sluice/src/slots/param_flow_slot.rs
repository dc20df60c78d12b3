use std::sync::Arc;

use crate::error::BlockError;
use crate::param_flow;
use crate::slots::{Decision, Departure, Flight, Next, Slot};

/// Hot-parameter throttling plus its own outcome accounting: the per-value
/// counters live here rather than in the statistic stage, and they track the
/// final decision of the whole chain.
pub(crate) struct ParamFlowSlot;

impl Slot for ParamFlowSlot {
    fn enter(&self, flight: &mut Flight<'_>, next: Next<'_>) -> Decision {
        let Some(rules) = flight.shared.param_rules.rules_for(flight.resource.name()) else {
            return next.run(flight);
        };

        let metric = flight.shared.param_metric_for(flight.resource.name());
        for active in &rules {
            metric.initialize_for_index(active.rule().param_idx);
        }

        for active in &rules {
            if let Some(value) = param_flow::pass_check(&metric, active, flight.batch, flight.args)
            {
                metric.add_block(flight.batch, flight.args);
                return Decision::Block(BlockError::ParamFlow {
                    resource: Arc::clone(flight.resource.name()),
                    value,
                    rule: Arc::clone(active.rule()),
                });
            }
        }

        let decision = next.run(flight);
        match &decision {
            Decision::Admit => {
                metric.add_pass(flight.batch, flight.args);
                metric.add_thread_count(flight.args);
                flight.param_thread_counted = true;
            }
            Decision::AdmitAfter(_) => {
                metric.add_pass(flight.batch, flight.args);
            }
            Decision::Block(_) => {
                metric.add_block(flight.batch, flight.args);
            }
        }
        decision
    }

    fn exit(&self, departure: &Departure<'_>) {
        if !departure.param_thread_counted || departure.args.is_empty() {
            return;
        }
        if let Some(metric) = departure
            .shared
            .param_metrics
            .get(departure.resource.name())
        {
            metric.decrease_thread_count(departure.args);
        }
    }
}
