use std::sync::Arc;

use crate::flow::LIMIT_ORIGIN_DEFAULT;
use crate::node::ClusterNode;
use crate::slots::{Decision, Flight, Next, Slot};

/// Ensures the resource's process-wide cluster node exists, assigns it to the
/// selected node, and resolves the per-origin statistic node when the call
/// carries a non-default origin.
pub(crate) struct ClusterBuilderSlot;

impl Slot for ClusterBuilderSlot {
    fn enter(&self, flight: &mut Flight<'_>, next: Next<'_>) -> Decision {
        let config = &flight.shared.config;
        let cluster = flight
            .shared
            .cluster_nodes
            .entry(Arc::clone(flight.resource.name()))
            .or_insert_with(|| {
                Arc::new(ClusterNode::new(
                    flight.shared.clock.clone(),
                    config.sample_count,
                    config.interval_ms,
                ))
            })
            .clone();

        if let Some(node) = &flight.node {
            node.set_cluster_node(Arc::clone(&cluster));
        }

        if let Some(origin) = &flight.origin {
            if &**origin != LIMIT_ORIGIN_DEFAULT {
                flight.origin_node = Some(cluster.origin_node(origin));
            }
        }

        flight.cluster = Some(cluster);
        next.run(flight)
    }
}
