//! Durable routing state
//!
//! Remembers which channel and chat the user talked to last so that
//! background triggers (cron jobs, heartbeat) know where to deliver.

pub mod store;

pub use store::{RoutingState, StateStore};
