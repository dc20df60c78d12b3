use std::sync::Arc;

use crate::node::{DefaultNode, NodeKind};
use crate::slots::{Decision, Flight, Next, Slot};

/// Resolves the per-(context, resource) node for this acquisition and hangs
/// it into the invocation tree: under the enclosing entry's node, or under
/// the context's entrance for an outermost entry.
pub(crate) struct NodeSelectorSlot;

impl Slot for NodeSelectorSlot {
    fn enter(&self, flight: &mut Flight<'_>, next: Next<'_>) -> Decision {
        let key = (
            Arc::clone(&flight.context_name),
            Arc::clone(flight.resource.name()),
        );

        let node = match flight.shared.node_cache.get(&key) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                let config = &flight.shared.config;
                let node = flight
                    .shared
                    .node_cache
                    .entry(key)
                    .or_insert_with(|| {
                        Arc::new(DefaultNode::new(
                            flight.resource.clone(),
                            NodeKind::Plain,
                            flight.shared.clock.clone(),
                            config.sample_count,
                            config.interval_ms,
                        ))
                    })
                    .clone();

                let parent = flight
                    .parent_node
                    .clone()
                    .unwrap_or_else(|| Arc::clone(&flight.entrance));
                parent.add_child(Arc::clone(&node));
                node
            }
        };

        flight.node = Some(node);
        next.run(flight)
    }
}
