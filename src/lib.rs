//! ulticlock: calendar-driven alarm engine.
//!
//! Calendar events become alarms that fire at precise wall-clock times,
//! with snoozing, cancellation and pluggable trigger actions.
//!
//! # Architecture
//!
//! - **Actions** ([`actions`]): plugin discovery and best-effort fan-out
//! - **Event store** ([`store`]): SQLite rows with lifecycle status, stored in UTC
//! - **Scheduler** ([`scheduler`]): pending tasks, dispatch loop, HTTP control surface
//! - **Reconciliation** ([`sync`]): merges calendar truth into store and scheduler
//!
//! [`startup::Service`] wires them together.

pub mod actions;
pub mod calendar;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod paths;
pub mod scheduler;
pub mod startup;
pub mod store;
pub mod sync;
pub mod time_spec;

pub use calendar::{CalendarEvent, CalendarSource};
pub use config::AlarmConfig;
pub use error::{AlarmError, Result};
pub use scheduler::{AlarmScheduler, AlarmStatus, SchedulerControl};
pub use startup::Service;
pub use store::{Event, EventStatus, EventStore};
pub use sync::{CycleReport, Reconciler};
