use crate::slots::{Decision, Flight, Next, Slot};

/// Emits a trace record for every rejection coming back from the deciders.
/// Purely observational; never alters the decision.
pub(crate) struct LogSlot;

impl Slot for LogSlot {
    fn enter(&self, flight: &mut Flight<'_>, next: Next<'_>) -> Decision {
        let decision = next.run(flight);
        if let Decision::Block(err) = &decision {
            tracing::debug!(
                resource = %flight.resource,
                origin = flight.origin.as_deref().unwrap_or(""),
                kind = err.kind(),
                "admission blocked"
            );
        }
        decision
    }
}
