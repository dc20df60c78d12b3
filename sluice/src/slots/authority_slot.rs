use std::sync::Arc;

use crate::error::BlockError;
use crate::slots::{Decision, Flight, Next, Slot};

/// Gates the call on origin white/black lists. Every rule of the resource
/// must permit the caller's origin.
pub(crate) struct AuthoritySlot;

impl Slot for AuthoritySlot {
    fn enter(&self, flight: &mut Flight<'_>, next: Next<'_>) -> Decision {
        if let Some(rules) = flight
            .shared
            .authority_rules
            .rules_for(flight.resource.name())
        {
            let origin = flight.origin.as_deref().unwrap_or("");
            for rule in rules {
                if !rule.permits(origin) {
                    return Decision::Block(BlockError::Authority {
                        resource: Arc::clone(flight.resource.name()),
                        origin: Arc::from(origin),
                        rule,
                    });
                }
            }
        }
        next.run(flight)
    }
}
