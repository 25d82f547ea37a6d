//! lwd-reconcile
//!
//! Tolerance-based reconciliation of the controller and scale channels.
//!
//! - [`evaluate`] is the pure rule: given two optional values and a policy,
//!   produce a [`ToleranceCheck`](lwd_schemas::ToleranceCheck).
//! - [`ReconciliationEngine`] owns the latest sample per source and the
//!   hot-swappable policy, and runs `evaluate` on request.

mod engine;
mod evaluate;

pub use engine::ReconciliationEngine;
pub use evaluate::{classify, evaluate};
