use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Direction of the traffic crossing a gated resource.
///
/// Inbound entries additionally feed the process-wide inbound aggregate that
/// system protection rules are evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficType {
    Inbound,
    #[default]
    Outbound,
}

/// A named point in code that admission is gated at.
///
/// Equality and hashing cover both the name and the traffic direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    name: Arc<str>,
    traffic: TrafficType,
}

impl Resource {
    pub fn new(name: impl AsRef<str>, traffic: TrafficType) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            traffic,
        }
    }

    pub fn inbound(name: impl AsRef<str>) -> Self {
        Self::new(name, TrafficType::Inbound)
    }

    pub fn outbound(name: impl AsRef<str>) -> Self {
        Self::new(name, TrafficType::Outbound)
    }

    #[inline]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[inline]
    pub fn traffic(&self) -> TrafficType {
        self.traffic
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
