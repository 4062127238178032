//! WebSocket session client: connects to the
//! controller's persistent session endpoint, runs the heartbeat/status
//! tickers, and dispatches inbound control messages into the
//! [`crate::scheduler::SchedulerSet`].
//!
//! Connects via `into_client_request` with header injection, then
//! `connect_async`, splitting the socket into sink and source halves.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use chrono::Utc;
use uptimemesh_core::{
    AgentInfo, AgentMessage, AgentStatus, ControllerMessage, MonitorError, MonitoringResultEntry, OsInfo, Result,
};

use crate::config::AgentConfig;
use crate::scheduler::{QueuedResult, ResultsQueue, SchedulerSet};

const HEARTBEAT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
const STATUS_SUMMARY_INTERVAL: Duration = Duration::from_secs(60);
const RESULT_SUBMIT_INTERVAL: Duration = Duration::from_secs(10);
const RESULT_SUBMIT_BATCH_SIZE: usize = 10;

fn queued_to_entry(item: QueuedResult) -> MonitoringResultEntry {
    MonitoringResultEntry {
        task_id: *item.task_id.as_ref(),
        status: item.status,
        response_time: item.response_time,
        status_code: item.status_code,
        error_message: item.error_message,
        metadata: Some(item.metadata),
        checked_at: item.checked_at.timestamp(),
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;
type WsSource = futures::stream::SplitStream<WsStream>;

fn local_os_info() -> OsInfo {
    OsInfo {
        os: std::env::consts::OS.to_string(),
        platform: std::env::consts::FAMILY.to_string(),
        architecture: std::env::consts::ARCH.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

async fn connect(config: &AgentConfig) -> Result<(WsSink, WsSource)> {
    let mut request = config
        .session_url()
        .into_client_request()
        .map_err(|e| MonitorError::Probe(format!("invalid session url: {e}")))?;

    request
        .headers_mut()
        .insert("X-Agent-Id", HeaderValue::from_str(&config.agent_id).map_err(|e| MonitorError::Probe(e.to_string()))?);
    request
        .headers_mut()
        .insert("X-Api-Key", HeaderValue::from_str(&config.api_key).map_err(|e| MonitorError::Probe(e.to_string()))?);

    let (stream, _response) =
        connect_async(request).await.map_err(|e| MonitorError::Probe(format!("websocket connect failed: {e}")))?;
    let (sink, source) = stream.split();
    Ok((sink, source))
}

async fn send(sink: &Arc<Mutex<WsSink>>, message: &AgentMessage) -> Result<()> {
    let text = serde_json::to_string(message)?;
    sink.lock().await.send(Message::Text(text.into())).await.map_err(|e| MonitorError::Probe(e.to_string()))
}

/// Runs one session end to end: connect, announce, request tasks, then
/// loop sending heartbeats/status summaries and dispatching inbound
/// messages until the connection closes or the cancellation signal fires.
/// Returns normally on a clean shutdown request; an `Err` means the
/// caller should fall back to HTTP polling or retry after a delay.
pub async fn run_session(
    config: &AgentConfig,
    schedulers: Arc<Mutex<SchedulerSet>>,
    queue: ResultsQueue,
    cancel: tokio_util::sync::CancellationToken,
) -> Result<()> {
    let (sink, mut source) = connect(config).await?;
    let sink = Arc::new(Mutex::new(sink));

    info!(agent_id = %config.agent_id, "session established");

    send(
        &sink,
        &AgentMessage::StatusUpdate {
            status: AgentStatus::Online,
            timestamp: Utc::now(),
            os_info: local_os_info(),
            agent_info: AgentInfo { version: env!("CARGO_PKG_VERSION").to_string(), capabilities: vec!["http".into(), "https".into(), "ping".into(), "log".into()] },
        },
    )
    .await?;

    send(&sink, &AgentMessage::RequestTasks { agent_id: config.agent_id.clone(), timestamp: Utc::now() }).await?;

    let mut heartbeat = tokio::time::interval(config.check_interval);
    let mut status_summary = tokio::time::interval(STATUS_SUMMARY_INTERVAL);
    let mut result_submit = tokio::time::interval(RESULT_SUBMIT_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let remaining = queue.drain(usize::MAX).await;
                if !remaining.is_empty() {
                    let _ = send(&sink, &AgentMessage::MonitoringResults {
                        agent_id: config.agent_id.clone(),
                        results: remaining.into_iter().map(queued_to_entry).collect(),
                        timestamp: Utc::now(),
                    }).await;
                }
                let _ = send(&sink, &AgentMessage::StatusUpdate {
                    status: AgentStatus::Offline,
                    timestamp: Utc::now(),
                    os_info: local_os_info(),
                    agent_info: AgentInfo::default(),
                }).await;
                return Ok(());
            }
            _ = result_submit.tick() => {
                let batch = queue.drain(RESULT_SUBMIT_BATCH_SIZE).await;
                if !batch.is_empty() {
                    let message = AgentMessage::MonitoringResults {
                        agent_id: config.agent_id.clone(),
                        results: batch.into_iter().map(queued_to_entry).collect(),
                        timestamp: Utc::now(),
                    };
                    if send(&sink, &message).await.is_err() {
                        warn!("result submission send failed, reconnecting after delay");
                        tokio::time::sleep(HEARTBEAT_RECONNECT_DELAY).await;
                        return Err(MonitorError::Probe("result submission send failed".into()));
                    }
                }
            }
            _ = heartbeat.tick() => {
                let message = AgentMessage::Heartbeat {
                    agent_id: config.agent_id.clone(),
                    timestamp: Utc::now(),
                    status: AgentStatus::Online,
                    os_info: None,
                };
                if send(&sink, &message).await.is_err() {
                    warn!("heartbeat send failed, reconnecting after delay");
                    tokio::time::sleep(HEARTBEAT_RECONNECT_DELAY).await;
                    return Err(MonitorError::Probe("heartbeat send failed".into()));
                }
            }
            _ = status_summary.tick() => {
                let count = schedulers.lock().await.active_count();
                info!(active_tasks = count, "status summary");
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = dispatch(&text, &schedulers).await {
                            debug!(error = %e, "failed to dispatch inbound message");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("session closed by controller");
                        return Err(MonitorError::SessionClosed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "session read error");
                        return Err(MonitorError::Probe(e.to_string()));
                    }
                }
            }
        }
    }
}

async fn dispatch(text: &str, schedulers: &Arc<Mutex<SchedulerSet>>) -> Result<()> {
    let message: ControllerMessage = serde_json::from_str(text)?;
    match message {
        ControllerMessage::TaskAssignment { tasks, .. } => {
            schedulers.lock().await.reconcile(tasks);
        }
        ControllerMessage::TaskRemoval { task_ids, .. } => {
            let ids: Vec<_> = task_ids.into_iter().map(Into::into).collect();
            schedulers.lock().await.remove_tasks(&ids);
        }
        ControllerMessage::StatusAck { .. }
        | ControllerMessage::HeartbeatAck { .. }
        | ControllerMessage::ResultAck { .. }
        | ControllerMessage::ResultsAck { .. } => {
            debug!("ack received");
        }
        ControllerMessage::ServerShutdown { reason, .. } => {
            info!(reason, "controller requested shutdown");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uptimemesh_core::{MonitorType, ResultStatus};

    #[test]
    fn queued_result_converts_into_a_wire_entry() {
        let item = QueuedResult {
            task_id: 7.into(),
            status: ResultStatus::Up,
            response_time: Some(12.5),
            status_code: Some(200),
            error_message: None,
            metadata: uptimemesh_core::ResultMetadata::Empty,
            checked_at: Utc::now(),
        };
        let entry = queued_to_entry(item);
        assert_eq!(entry.task_id, 7);
        assert_eq!(entry.status_code, Some(200));
        assert!(entry.metadata.is_some());
    }

    #[tokio::test]
    async fn dispatch_task_assignment_reconciles_the_scheduler_set() {
        let schedulers =
            Arc::new(Mutex::new(SchedulerSet::new(ResultsQueue::new(), reqwest::Client::new(), "test-agent".into())));
        let task = uptimemesh_core::MonitorTask {
            id: 1.into(),
            resource_id: 1.into(),
            monitor_type: MonitorType::Http,
            url: "http://127.0.0.1:1".into(),
            interval: Duration::from_millis(50),
            timeout: Duration::from_millis(50),
            enabled: true,
            log_config: None,
        };
        let message = serde_json::to_string(&ControllerMessage::TaskAssignment {
            tasks: vec![task],
            timestamp: Utc::now(),
        })
        .unwrap();

        dispatch(&message, &schedulers).await.unwrap();
        assert_eq!(schedulers.lock().await.active_count(), 1);
    }
}
