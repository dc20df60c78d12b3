use std::sync::Arc;

use crate::error::BlockError;
use crate::resource::TrafficType;
use crate::slots::{Decision, Flight, Next, Slot};

/// Applies process-wide protection thresholds to inbound traffic; outbound
/// calls pass through untouched.
pub(crate) struct SystemSlot;

impl Slot for SystemSlot {
    fn enter(&self, flight: &mut Flight<'_>, next: Next<'_>) -> Decision {
        if flight.resource.traffic() == TrafficType::Inbound {
            let probe = flight.shared.probe.read().clone();
            if let Some(gate) = flight.shared.system_rules.check(
                &flight.shared.inbound,
                flight.batch,
                probe.as_ref(),
            ) {
                return Decision::Block(BlockError::System {
                    resource: Arc::clone(flight.resource.name()),
                    gate,
                });
            }
        }
        next.run(flight)
    }
}
