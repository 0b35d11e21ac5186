//! Heartbeat configuration types

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::turn::SILENT_SENTINEL;

/// Default heartbeat interval: 30 minutes (in seconds)
pub const DEFAULT_HEARTBEAT_INTERVAL_S: u64 = 30 * 60;

/// Shortest allowed interval: 5 minutes (in seconds)
pub const MIN_HEARTBEAT_INTERVAL_S: u64 = 5 * 60;

/// Checklist file name inside the workspace
pub const HEARTBEAT_FILE: &str = "HEARTBEAT.md";

/// Checklist written when none exists yet
pub const DEFAULT_HEARTBEAT_TEMPLATE: &str = r#"# Heartbeat Check List

This file contains tasks for the heartbeat service to check periodically.

## Examples

- Check for unread messages
- Review upcoming calendar events
- Check on long running jobs

## Instructions

If there's nothing that needs attention, respond with: HEARTBEAT_OK
This keeps the heartbeat silent when everything is fine.

---

Add your heartbeat tasks below this line:
"#;

/// Heartbeat configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Whether heartbeat is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interval in seconds between heartbeats; 0 means the default
    #[serde(default = "default_interval")]
    pub interval_s: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_s: DEFAULT_HEARTBEAT_INTERVAL_S,
        }
    }
}

impl HeartbeatConfig {
    /// Interval actually used, with the floor applied
    pub fn effective_interval_s(&self) -> u64 {
        match self.interval_s {
            0 => DEFAULT_HEARTBEAT_INTERVAL_S,
            s => s.max(MIN_HEARTBEAT_INTERVAL_S),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_S
}

/// Check if HEARTBEAT.md has no actionable content
pub fn is_heartbeat_empty(content: Option<&str>) -> bool {
    let content = match content {
        Some(c) => c,
        None => return true,
    };

    // Lines to skip: empty, headers, HTML comments, empty checkboxes
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty()
            || line.starts_with('#')
            || line.starts_with("<!--")
            || line == "- [ ]"
            || line == "* [ ]"
            || line == "- [x]"
            || line == "* [x]"
        {
            continue;
        }
        return false;
    }

    true
}

/// Build the proactive prompt from the checklist
pub fn build_prompt<Tz>(now: &DateTime<Tz>, checklist: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!(
        "# Heartbeat Check\n\n\
         Current time: {}\n\n\
         You are a proactive assistant. This is a scheduled heartbeat check.\n\
         Review the following tasks and take any necessary actions.\n\
         If there is nothing that requires attention, respond ONLY with: {}\n\n\
         {}\n",
        now.format("%Y-%m-%d %H:%M:%S"),
        SILENT_SENTINEL,
        checklist
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_heartbeat_config_default() {
        let config = HeartbeatConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval_s, DEFAULT_HEARTBEAT_INTERVAL_S);
    }

    #[test]
    fn test_interval_floor_and_default() {
        let config = |interval_s| HeartbeatConfig {
            enabled: true,
            interval_s,
        };
        assert_eq!(config(0).effective_interval_s(), DEFAULT_HEARTBEAT_INTERVAL_S);
        assert_eq!(config(60).effective_interval_s(), MIN_HEARTBEAT_INTERVAL_S);
        assert_eq!(config(3600).effective_interval_s(), 3600);
    }

    #[test]
    fn test_is_heartbeat_empty_none() {
        assert!(is_heartbeat_empty(None));
    }

    #[test]
    fn test_is_heartbeat_empty_whitespace_only() {
        assert!(is_heartbeat_empty(Some("")));
        assert!(is_heartbeat_empty(Some("   \n\t  ")));
    }

    #[test]
    fn test_is_heartbeat_empty_mixed_skippable() {
        let content = "# Title\n\n<!-- comment -->\n- [ ]\n\n* [x]\n## Sub";
        assert!(is_heartbeat_empty(Some(content)));
    }

    #[test]
    fn test_is_heartbeat_empty_has_content() {
        assert!(!is_heartbeat_empty(Some("# Title\n\nSome actionable content here")));
        assert!(!is_heartbeat_empty(Some("- [ ] Task with description")));
    }

    #[test]
    fn test_default_template_is_actionable() {
        assert!(!is_heartbeat_empty(Some(DEFAULT_HEARTBEAT_TEMPLATE)));
        assert!(DEFAULT_HEARTBEAT_TEMPLATE.contains(SILENT_SENTINEL));
    }

    #[test]
    fn test_build_prompt_includes_time_and_checklist() {
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let prompt = build_prompt(&now, "- feed the cat");
        assert!(prompt.contains("Current time: 2024-05-06 07:08:09"));
        assert!(prompt.contains("- feed the cat"));
        assert!(prompt.contains(SILENT_SENTINEL));
    }
}
