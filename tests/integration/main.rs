//! Integration test binary: every integration test module linked into one
//! test target.

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

mod control_surface_http;
mod event_store_tz;
mod reconciliation_cycle;
mod scheduler_control;
