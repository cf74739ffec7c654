//! Alarm task scheduler.
//!
//! Holds the live set of pending alarms, dispatches due ones through an
//! [`AlarmExecutor`], and exposes the create/modify/cancel/snooze/status
//! contract both in-process ([`AlarmScheduler`]) and over HTTP
//! ([`ControlServer`] / [`HttpSchedulerClient`]).
//!
//! Pending tasks are not persisted; only the event store survives a restart.

pub mod client;
pub mod control;
pub mod executor;
pub mod runner;
pub mod server;
pub mod tasks;

pub use client::HttpSchedulerClient;
pub use control::{AlarmStatus, SchedulerControl};
pub use executor::{ActionDispatch, AlarmExecutor};
pub use runner::AlarmScheduler;
pub use server::ControlServer;
pub use tasks::{AlarmTask, TaskQueue};
