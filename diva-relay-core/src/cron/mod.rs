//! Scheduled jobs
//!
//! Interval and calendar jobs persisted in the workspace; due jobs are
//! turned into bus messages or direct deliveries.

pub mod expr;
pub mod service;
pub mod types;

pub use service::{compute_next_run, CronService};
pub use types::{CronDelivery, CronJob, CronJobState, CronSchedule};
