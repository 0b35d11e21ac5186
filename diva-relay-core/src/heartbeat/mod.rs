//! Heartbeat service for periodic proactive checks

pub mod service;
pub mod types;

pub use service::{BeatOutcome, HeartbeatService};
pub use types::{
    build_prompt, is_heartbeat_empty, HeartbeatConfig, DEFAULT_HEARTBEAT_INTERVAL_S,
    DEFAULT_HEARTBEAT_TEMPLATE, HEARTBEAT_FILE, MIN_HEARTBEAT_INTERVAL_S,
};
