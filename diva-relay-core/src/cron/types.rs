//! Cron types for scheduled jobs

use serde::{Deserialize, Serialize};

use super::expr;
use crate::{Error, Result};

/// Schedule definition for a cron job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CronSchedule {
    /// Run at regular intervals
    Every { every_ms: i64 },
    /// Run on a five-field calendar expression
    Cron {
        expr: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
}

impl CronSchedule {
    /// Create a recurring schedule
    pub fn every(every_ms: i64) -> Self {
        Self::Every { every_ms }
    }

    /// Create a cron expression schedule
    pub fn cron(expr: impl Into<String>, tz: Option<String>) -> Self {
        Self::Cron {
            expr: expr.into(),
            tz,
        }
    }

    /// Build from the optional parts a caller supplied; exactly one of the
    /// interval and the expression must be present
    pub fn from_parts(
        every_ms: Option<i64>,
        expr: Option<String>,
        tz: Option<String>,
    ) -> Result<Self> {
        let expr = expr.filter(|e| !e.trim().is_empty());
        match (every_ms.filter(|ms| *ms != 0), expr) {
            (Some(every_ms), None) => Ok(Self::every(every_ms)),
            (None, Some(expr)) => Ok(Self::cron(expr, tz)),
            (None, None) => Err(Error::Schedule(
                "either an interval or a cron expression is required".to_string(),
            )),
            (Some(_), Some(_)) => Err(Error::Schedule(
                "an interval and a cron expression are mutually exclusive".to_string(),
            )),
        }
    }

    /// Reject schedules that can never fire
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Every { every_ms } if *every_ms <= 0 => Err(Error::Schedule(format!(
                "interval must be positive, got {}ms",
                every_ms
            ))),
            Self::Every { .. } => Ok(()),
            Self::Cron { expr, tz } => {
                expr::parse(expr)?;
                if let Some(tz) = tz {
                    expr::parse_tz(tz)?;
                }
                Ok(())
            }
        }
    }

    /// Human readable form for logs and listings
    pub fn describe(&self) -> String {
        match self {
            Self::Every { every_ms } if every_ms % 1000 == 0 => {
                format!("every {}s", every_ms / 1000)
            }
            Self::Every { every_ms } => format!("every {}ms", every_ms),
            Self::Cron { expr, tz: Some(tz) } => format!("{} ({})", expr, tz),
            Self::Cron { expr, tz: None } => expr.clone(),
        }
    }
}

/// Where a job's output goes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronDelivery {
    /// Send `message` verbatim to the target instead of running a turn
    #[serde(default)]
    pub deliver: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl CronDelivery {
    /// Explicit `(channel, chat_id)` target, when both parts are set
    pub fn target(&self) -> Option<(String, String)> {
        match (self.channel.as_deref(), self.to.as_deref()) {
            (Some(channel), Some(to)) if !channel.is_empty() && !to.is_empty() => {
                Some((channel.to_string(), to.to_string()))
            }
            _ => None,
        }
    }
}

/// Runtime state of a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronJobState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A scheduled job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub schedule: CronSchedule,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub delivery: CronDelivery,
    #[serde(default)]
    pub state: CronJobState,
    #[serde(default)]
    pub created_at_ms: i64,
    #[serde(default)]
    pub updated_at_ms: i64,
}

fn default_true() -> bool {
    true
}
