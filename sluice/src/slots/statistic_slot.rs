use crate::node::Node;
use crate::resource::TrafficType;
use crate::slots::{Decision, Departure, Flight, Next, Slot};

/// The only stage that records outcomes. Runs the rest of the chain first,
/// then books the decision into the selected node, the origin node, the
/// cluster node and (for inbound traffic) the process-wide inbound
/// aggregate.
///
/// A delayed admission is not booked here: its pass was already accounted
/// through the occupied-capacity path by the shaper that slept the caller,
/// and the thread counters are left alone.
pub(crate) struct StatisticSlot;

impl StatisticSlot {
    fn each_node<'a>(flight: &'a Flight<'_>, mut f: impl FnMut(&'a dyn Node)) {
        if let Some(node) = &flight.node {
            f(node.as_ref());
        }
        if let Some(origin) = &flight.origin_node {
            f(origin.as_ref());
        }
        if let Some(cluster) = &flight.cluster {
            f(cluster.as_ref());
        }
        if flight.resource.traffic() == TrafficType::Inbound {
            f(flight.shared.inbound.as_ref());
        }
    }

    fn each_exit_node<'a>(departure: &'a Departure<'_>, mut f: impl FnMut(&'a dyn Node)) {
        f(departure.node.as_ref());
        if let Some(origin) = departure.origin_node {
            f(origin.as_ref());
        }
        if let Some(cluster) = departure.cluster {
            f(cluster.as_ref());
        }
        if departure.resource.traffic() == TrafficType::Inbound {
            f(departure.shared.inbound.as_ref());
        }
    }
}

impl Slot for StatisticSlot {
    fn enter(&self, flight: &mut Flight<'_>, next: Next<'_>) -> Decision {
        let decision = next.run(flight);

        match &decision {
            Decision::Admit => {
                let batch = flight.batch;
                Self::each_node(flight, |node| {
                    node.increase_thread_num();
                    node.add_pass_request(batch);
                });
            }
            Decision::AdmitAfter(_) => {}
            Decision::Block(_) => {
                let batch = flight.batch;
                Self::each_node(flight, |node| {
                    node.increase_block_qps(batch);
                });
            }
        }

        decision
    }

    fn exit(&self, departure: &Departure<'_>) {
        let rt = departure.rt_ms.min(departure.shared.config.max_rt_ms);
        let batch = departure.batch;
        let errored = departure.error.is_some();
        let counted = departure.thread_counted;

        Self::each_exit_node(departure, |node| {
            node.add_rt_and_success(rt, batch);
            if counted {
                node.decrease_thread_num();
            }
            if errored {
                node.increase_exception_qps(batch);
            }
        });
    }
}
