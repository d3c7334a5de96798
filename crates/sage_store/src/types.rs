//! Rows of the SAGE store.

use chrono::{DateTime, Utc};
use sage_monitor::ChannelConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An intake endpoint: one channel bound to one package of a YAML config.
#[derive(Debug, Clone, PartialEq)]
pub struct Databox {
    pub id: i64,
    pub name: String,
    pub channel: ChannelConfig,
    /// Package key or name inside `config_yaml`.
    pub package: String,
    pub config_yaml: String,
    pub active: bool,
}

/// Fields needed to register a databox.
#[derive(Debug, Clone)]
pub struct NewDatabox {
    pub name: String,
    pub channel: ChannelConfig,
    pub package: String,
    pub config_yaml: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Validated with no errors (warnings allowed).
    Success,
    /// Validated, with at least one error violation.
    Failed,
    /// Could not be validated at all.
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Error => "error",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            "error" => Ok(ExecutionStatus::Error),
            other => Err(format!("unknown execution status '{}'", other)),
        }
    }
}

/// Outcome of processing one candidate file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub databox_id: i64,
    pub sender: String,
    pub file_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub errors: u64,
    pub warnings: u64,
    /// JSON violation report, or the failure message.
    pub detail: Option<String>,
}
