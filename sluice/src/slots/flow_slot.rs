use crate::flow;
use crate::slots::{Decision, Flight, Next, Slot};

/// Evaluates the flow rules of the resource. A delayed admission returns
/// without running the remaining stages: the caller has already slept and
/// holds a promise against a future window.
pub(crate) struct FlowSlot;

impl Slot for FlowSlot {
    fn enter(&self, flight: &mut Flight<'_>, next: Next<'_>) -> Decision {
        match flow::check_flow(flight.shared, flight) {
            Decision::Admit => next.run(flight),
            decided => decided,
        }
    }
}
