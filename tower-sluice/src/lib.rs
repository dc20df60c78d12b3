//! # Tower Sluice
//!
//! `tower-sluice` gates every request of a [Tower](https://github.com/tower-rs/tower)
//! service through a [`sluice`] runtime: admission is checked before the
//! inner service runs, response time is recorded on completion, and inner
//! errors feed the circuit breaker.
//!
//! Entries are acquired in detached mode, so the response future may resume
//! on any worker thread. Pair the layer with rules that use the reject
//! behavior; queueing behaviors sleep the polling thread.
//!
//! ```rust
//! use std::sync::Arc;
//! use sluice::{FlowRule, Sluice};
//! use tower_sluice::GateLayer;
//!
//! let sluice = Sluice::new();
//! sluice
//!     .load_flow_rules(vec![FlowRule {
//!         resource: "inbound-http".into(),
//!         count: 500.0,
//!         ..FlowRule::default()
//!     }])
//!     .unwrap();
//!
//! let layer = GateLayer::new(sluice, "inbound-http");
//! # let _ = layer;
//! ```

mod error;
mod layer;
mod service;

#[cfg(test)]
mod tests;

pub use error::GateError;
pub use layer::GateLayer;
pub use service::GateService;
