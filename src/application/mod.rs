//! Application layer - Background services that coordinate ports.

pub mod reconciliation;

pub use reconciliation::{ReconciliationConfig, ReconciliationReport, ReconciliationWorker};
