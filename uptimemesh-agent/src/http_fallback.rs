//! HTTP polling fallback: used when the persistent session
//! cannot be established or keeps failing. Polls for tasks every 5
//! minutes, checks in every `check_interval`, and batches result
//! submission (10 results or 30 seconds, whichever comes first).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;
use uptimemesh_core::{AgentStatus, MonitorTask, OsInfo, Result};

use crate::config::AgentConfig;
use crate::scheduler::{QueuedResult, ResultsQueue, SchedulerSet};

const TASK_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);
const RESULT_BATCH_SIZE: usize = 10;
const RESULT_BATCH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct CheckinRequest {
    agent_id: String,
    status: AgentStatus,
    os_info: Option<OsInfo>,
}

#[derive(Debug, Deserialize)]
struct CheckinResponse {
    acknowledged: bool,
}

#[derive(Debug, Serialize)]
struct SubmitResult {
    agent_id: String,
    task_id: i64,
    status: uptimemesh_core::ResultStatus,
    response_time: Option<f64>,
    status_code: Option<u16>,
    error_message: Option<String>,
    metadata: Option<uptimemesh_core::ResultMetadata>,
    checked_at: i64,
}

fn queued_to_submit(agent_id: &str, item: QueuedResult) -> SubmitResult {
    SubmitResult {
        agent_id: agent_id.to_string(),
        task_id: *item.task_id.as_ref(),
        status: item.status,
        response_time: item.response_time,
        status_code: item.status_code,
        error_message: item.error_message,
        metadata: Some(item.metadata),
        checked_at: item.checked_at.timestamp(),
    }
}

async fn poll_tasks(client: &reqwest::Client, config: &AgentConfig) -> Result<Vec<MonitorTask>> {
    let response = client
        .get(format!("{}/monitoring/tasks", config.http_base()))
        .header("X-Api-Key", &config.api_key)
        .send()
        .await
        .map_err(|e| uptimemesh_core::MonitorError::Probe(e.to_string()))?;
    response.json().await.map_err(|e| uptimemesh_core::MonitorError::Probe(e.to_string()))
}

async fn checkin(client: &reqwest::Client, config: &AgentConfig) -> Result<()> {
    let response = client
        .post(format!("{}/agents/checkin", config.http_base()))
        .header("X-Api-Key", &config.api_key)
        .json(&CheckinRequest { agent_id: config.agent_id.clone(), status: AgentStatus::Online, os_info: None })
        .send()
        .await
        .map_err(|e| uptimemesh_core::MonitorError::Probe(e.to_string()))?;
    let body: CheckinResponse =
        response.json().await.map_err(|e| uptimemesh_core::MonitorError::Probe(e.to_string()))?;
    if !body.acknowledged {
        warn!(agent_id = %config.agent_id, "checkin was not acknowledged");
    }
    Ok(())
}

async fn submit_results(client: &reqwest::Client, config: &AgentConfig, batch: Vec<SubmitResult>) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    client
        .post(format!("{}/monitoring/results", config.http_base()))
        .header("X-Api-Key", &config.api_key)
        .json(&batch)
        .send()
        .await
        .map_err(|e| uptimemesh_core::MonitorError::Probe(e.to_string()))?;
    Ok(())
}

/// Runs the fallback loop until cancellation. Each of the three concerns
/// (task poll, checkin, result submission) ticks on its own timer.
pub async fn run(
    config: &AgentConfig,
    schedulers: Arc<Mutex<SchedulerSet>>,
    queue: ResultsQueue,
    http_client: reqwest::Client,
    cancel: tokio_util::sync::CancellationToken,
) {
    let mut task_poll = tokio::time::interval(TASK_POLL_INTERVAL);
    let mut checkin_tick = tokio::time::interval(config.check_interval);
    let mut batch_tick = tokio::time::interval(RESULT_BATCH_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let batch: Vec<SubmitResult> =
                    queue.drain(usize::MAX).await.into_iter().map(|r| queued_to_submit(&config.agent_id, r)).collect();
                let _ = submit_results(&http_client, config, batch).await;
                return;
            }
            _ = task_poll.tick() => {
                match poll_tasks(&http_client, config).await {
                    Ok(tasks) => schedulers.lock().await.reconcile(tasks),
                    Err(e) => warn!(error = %e, "task poll failed"),
                }
            }
            _ = checkin_tick.tick() => {
                if let Err(e) = checkin(&http_client, config).await {
                    warn!(error = %e, "checkin failed");
                }
            }
            _ = batch_tick.tick() => {
                let batch: Vec<SubmitResult> =
                    queue.drain(RESULT_BATCH_SIZE).await.into_iter().map(|r| queued_to_submit(&config.agent_id, r)).collect();
                if let Err(e) = submit_results(&http_client, config, batch).await {
                    warn!(error = %e, "result submission failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn queued_result_converts_task_id_to_plain_i64() {
        let item = QueuedResult {
            task_id: 42.into(),
            status: uptimemesh_core::ResultStatus::Up,
            response_time: Some(1.0),
            status_code: Some(200),
            error_message: None,
            metadata: uptimemesh_core::ResultMetadata::Empty,
            checked_at: Utc::now(),
        };
        let submit = queued_to_submit("agent-1", item);
        assert_eq!(submit.task_id, 42);
        assert_eq!(submit.agent_id, "agent-1");
    }
}
