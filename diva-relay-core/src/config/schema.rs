//! Configuration schema

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

pub use crate::heartbeat::types::HeartbeatConfig;
use crate::utils::expand_home;

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding routing state, jobs and the heartbeat checklist
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub cron: CronConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_workspace() -> String {
    "~/.diva-relay/workspace".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            gateway: GatewayConfig::default(),
            cron: CronConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            channels: ChannelsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Workspace directory with `~` expanded
    pub fn workspace_path(&self) -> PathBuf {
        expand_home(&self.workspace)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Days to keep rotated log files; 0 keeps everything
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_retention_days() -> u64 {
    7
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            retention_days: default_retention_days(),
            overrides: HashMap::new(),
        }
    }
}

/// Turn processing limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Absolute limit for one turn in seconds
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_s: u64,
    /// Messages queued per chat before producers wait
    #[serde(default = "default_queue_depth")]
    pub chat_queue_depth: usize,
    /// Seconds an idle chat lane is kept before it is retired
    #[serde(default = "default_lane_idle")]
    pub lane_idle_s: u64,
    /// Seconds to wait for in-flight turns at shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_s: u64,
}

fn default_turn_timeout() -> u64 {
    300
}

fn default_queue_depth() -> usize {
    32
}

fn default_lane_idle() -> u64 {
    300
}

fn default_shutdown_grace() -> u64 {
    10
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            turn_timeout_s: default_turn_timeout(),
            chat_queue_depth: default_queue_depth(),
            lane_idle_s: default_lane_idle(),
            shutdown_grace_s: default_shutdown_grace(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Milliseconds between scans for due jobs
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval() -> u64 {
    1000
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: default_tick_interval(),
        }
    }
}

/// Channel configurations
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub line: LineConfig,
}

/// LINE Official Account configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub channel_secret: String,
    #[serde(default)]
    pub channel_access_token: String,
    #[serde(default = "default_line_host")]
    pub webhook_host: String,
    #[serde(default = "default_line_port")]
    pub webhook_port: u16,
    #[serde(default = "default_line_path")]
    pub webhook_path: String,
    #[serde(default)]
    pub allow_from: Vec<String>,
    /// Messaging API base URL
    #[serde(default = "default_line_api_base")]
    pub api_base: String,
    /// Content download base URL
    #[serde(default = "default_line_data_api_base")]
    pub data_api_base: String,
}

fn default_line_host() -> String {
    "0.0.0.0".to_string()
}

fn default_line_port() -> u16 {
    18791
}

fn default_line_path() -> String {
    "/webhook/line".to_string()
}

fn default_line_api_base() -> String {
    "https://api.line.me".to_string()
}

fn default_line_data_api_base() -> String {
    "https://api-data.line.me".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel_secret: String::new(),
            channel_access_token: String::new(),
            webhook_host: default_line_host(),
            webhook_port: default_line_port(),
            webhook_path: default_line_path(),
            allow_from: Vec::new(),
            api_base: default_line_api_base(),
            data_api_base: default_line_data_api_base(),
        }
    }
}
