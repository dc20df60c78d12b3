use std::sync::Arc;

use crate::error::BlockError;
use crate::slots::{Decision, Flight, Next, Slot};

/// Circuit breaking per resource: every breaker of the resource must agree
/// before the call is admitted.
pub(crate) struct DegradeSlot;

impl Slot for DegradeSlot {
    fn enter(&self, flight: &mut Flight<'_>, next: Next<'_>) -> Decision {
        if let Some(breakers) = flight
            .shared
            .degrade_rules
            .breakers_for(flight.resource.name())
        {
            // A resource without a cluster node has no statistics to trip on.
            if let Some(cluster) = &flight.cluster {
                for breaker in breakers {
                    if !breaker.try_pass(cluster, &flight.shared.timer) {
                        return Decision::Block(BlockError::Degrade {
                            resource: Arc::clone(flight.resource.name()),
                            rule: Arc::clone(breaker.rule()),
                        });
                    }
                }
            }
        }
        next.run(flight)
    }
}
