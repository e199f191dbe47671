// Reconciliation with the external invoice system of record
pub mod engine;

pub use engine::{ReconciliationConfig, ReconciliationEngine, ReconciliationReport};
