use std::sync::Arc;

use sluice::{Sluice, TrafficType};
use tower::Layer;

use crate::service::GateService;

/// Applies traffic governance to requests under one resource name.
#[derive(Debug, Clone)]
pub struct GateLayer {
    sluice: Sluice,
    resource: Arc<str>,
    traffic: TrafficType,
    origin: Option<Arc<str>>,
}

impl GateLayer {
    /// Gate requests as inbound traffic on `resource`.
    pub fn new(sluice: Sluice, resource: impl AsRef<str>) -> Self {
        Self {
            sluice,
            resource: Arc::from(resource.as_ref()),
            traffic: TrafficType::Inbound,
            origin: None,
        }
    }

    /// Override the traffic direction (inbound by default).
    pub fn with_traffic(mut self, traffic: TrafficType) -> Self {
        self.traffic = traffic;
        self
    }

    /// Attribute all requests through this layer to a fixed calling origin,
    /// engaging origin-scoped flow and authority rules.
    pub fn with_origin(mut self, origin: impl AsRef<str>) -> Self {
        self.origin = Some(Arc::from(origin.as_ref()));
        self
    }
}

impl<S> Layer<S> for GateLayer {
    type Service = GateService<S>;

    fn layer(&self, service: S) -> Self::Service {
        GateService::new(
            service,
            self.sluice.clone(),
            Arc::clone(&self.resource),
            self.traffic,
            self.origin.clone(),
        )
    }
}
