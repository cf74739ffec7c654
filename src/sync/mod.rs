//! Periodic reconciliation of calendar truth into the store and scheduler.

pub mod reconciler;

pub use reconciler::{CycleReport, EMERGENCY_SUFFIX, Reconciler, SNOOZE_SUFFIX};
