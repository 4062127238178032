//! The JSON control-plane protocol spoken over the agent session.
//!
//! Every message carries a `type` discriminant; `serde`'s internally tagged
//! representation gives us that for free and keeps the wire shape stable.

use crate::model::{AgentStatus, MonitorTask, OsInfo, ResultMetadata, ResultStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentInfo {
    pub version: String,
    pub capabilities: Vec<String>,
}

/// Messages an Agent sends to the Controller over the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    StatusUpdate {
        status: AgentStatus,
        timestamp: DateTime<Utc>,
        os_info: OsInfo,
        agent_info: AgentInfo,
    },
    Heartbeat {
        agent_id: String,
        timestamp: DateTime<Utc>,
        status: AgentStatus,
        os_info: Option<OsInfo>,
    },
    RequestTasks {
        agent_id: String,
        timestamp: DateTime<Utc>,
    },
    MonitoringResult {
        agent_id: String,
        task_id: i64,
        status: ResultStatus,
        response_time: Option<f64>,
        status_code: Option<u16>,
        error_message: Option<String>,
        #[serde(default)]
        metadata: Option<ResultMetadata>,
        checked_at: i64,
        timestamp: DateTime<Utc>,
    },
    MonitoringResults {
        agent_id: String,
        results: Vec<MonitoringResultEntry>,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringResultEntry {
    pub task_id: i64,
    pub status: ResultStatus,
    pub response_time: Option<f64>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: Option<ResultMetadata>,
    pub checked_at: i64,
}

/// Messages the Controller sends to an Agent over the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerMessage {
    TaskAssignment { tasks: Vec<MonitorTask>, timestamp: DateTime<Utc> },
    TaskRemoval { task_ids: Vec<i64>, timestamp: DateTime<Utc> },
    StatusAck { timestamp: DateTime<Utc> },
    HeartbeatAck { timestamp: DateTime<Utc> },
    ResultAck { timestamp: DateTime<Utc> },
    ResultsAck { count: usize, timestamp: DateTime<Utc> },
    ServerShutdown { reason: String, timestamp: DateTime<Utc> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_message_round_trips_through_json() {
        let msg = AgentMessage::Heartbeat {
            agent_id: "eu-west-1".into(),
            timestamp: Utc::now(),
            status: AgentStatus::Online,
            os_info: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "heartbeat");
        let back: AgentMessage = serde_json::from_value(json).unwrap();
        matches!(back, AgentMessage::Heartbeat { .. });
    }

    #[test]
    fn controller_message_tags_task_removal() {
        let msg = ControllerMessage::TaskRemoval { task_ids: vec![1, 2], timestamp: Utc::now() };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "task_removal");
        assert_eq!(json["task_ids"], serde_json::json!([1, 2]));
    }
}
