use chrono::{DateTime, Utc};
use derive_more::{AsRef, Deref, Display, From, Into};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, From, AsRef, Deref, Into, Serialize, Deserialize)]
pub struct ResourceId(i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, From, AsRef, Deref, Into, Serialize, Deserialize)]
pub struct TaskId(i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, From, AsRef, Deref, Into, Serialize, Deserialize)]
pub struct AgentId(i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, From, AsRef, Deref, Into, Serialize, Deserialize)]
pub struct ResultId(i64);

/// The monitor type a Resource's URL scheme is translated into. Determined
/// once, at insert time, and never recomputed — it is uniquely
/// determined by the URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorType {
    Http,
    Https,
    Ping,
    Log,
}

impl MonitorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorType::Http => "http",
            MonitorType::Https => "https",
            MonitorType::Ping => "ping",
            MonitorType::Log => "log",
        }
    }

    pub fn default_timeout(&self) -> std::time::Duration {
        match self {
            MonitorType::Http | MonitorType::Https => std::time::Duration::from_secs(30),
            MonitorType::Ping => std::time::Duration::from_secs(5),
            MonitorType::Log => std::time::Duration::from_secs(60),
        }
    }
}

impl std::str::FromStr for MonitorType {
    type Err = crate::error::MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(MonitorType::Http),
            "https" => Ok(MonitorType::Https),
            "ping" => Ok(MonitorType::Ping),
            "log" => Ok(MonitorType::Log),
            other => Err(crate::error::MonitorError::validation(format!(
                "unrecognized monitor type '{other}'"
            ))),
        }
    }
}

/// A user-declared monitoring target, identified by a scheme-prefixed URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub url: String,
    pub name: String,
    pub scan_interval: String,
    pub created_at: DateTime<Utc>,
}

/// The controller's executable derivation of a [`Resource`]: exactly one
/// per Resource, reconciled on startup and on every Resource mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorTask {
    pub id: TaskId,
    pub resource_id: ResourceId,
    pub monitor_type: MonitorType,
    /// Effective URL used to execute the probe. `ping://` and `log://`
    /// have their scheme prefix stripped.
    pub url: String,
    pub interval: std::time::Duration,
    pub timeout: std::time::Duration,
    pub enabled: bool,
    pub log_config: Option<LogConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Bootstrap,
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsInfo {
    pub os: String,
    pub platform: String,
    pub architecture: String,
    pub version: String,
}

/// A remote process that executes Tasks and returns Results. One row per
/// distinct `api_key_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub api_key_hash: String,
    pub key_type: KeyType,
    pub description: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub status: AgentStatus,
    pub os_info: Option<OsInfo>,
    pub remote_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Up,
    Down,
    Degraded,
    Error,
}

/// Precomputed log-analysis output, carried as `MonitorResult` metadata so
/// the Analytics Engine never has to re-parse log lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogMetrics {
    pub total_requests: u64,
    pub error_requests: u64,
    pub error_rate: f64,
    pub avg_response_time: Option<f64>,
    pub requests_per_minute: f64,
    pub status_codes: std::collections::BTreeMap<u16, u64>,
    pub top_errors: Vec<(String, u64)>,
    pub lines_analyzed: u64,
}

/// The validated, variant form of `MonitorResult.metadata`:
/// heterogeneous per probe kind, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultMetadata {
    Http { headers: std::collections::BTreeMap<String, String>, content_length: Option<u64> },
    Ping { output: String },
    Log(LogMetrics),
    Empty,
}

impl Default for ResultMetadata {
    fn default() -> Self {
        ResultMetadata::Empty
    }
}

/// Immutable once written. `task_id` and `agent_id` must resolve to extant
/// rows at insert time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorResult {
    pub id: ResultId,
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub status: ResultStatus,
    pub response_time: Option<f64>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub metadata: ResultMetadata,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Nginx,
    Apache,
    Json,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    pub file_path: String,
    pub format: LogFormat,
    pub custom_pattern: Option<String>,
    pub tail_lines: u64,
    pub encoding: String,
    pub error_codes: HashSet<u16>,
}

impl LogConfig {
    /// An HTTP status counts as an error if it is explicitly listed, or
    /// (when no codes are configured) if it is >= 400.
    pub fn is_error_code(&self, code: u16) -> bool {
        if self.error_codes.is_empty() {
            code >= 400
        } else {
            self.error_codes.contains(&code)
        }
    }
}

/// Ephemeral, controller-memory-only record of one connected agent:
/// at most one active session per external agent id.
#[derive(Debug, Clone)]
pub struct AgentSessionInfo {
    pub external_id: String,
    pub key_hash: String,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}
