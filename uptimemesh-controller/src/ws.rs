//! The persistent bidirectional session endpoint: a WebSocket
//! upgrade carrying the JSON [`AgentMessage`]/[`ControllerMessage`]
//! protocol.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use uptimemesh_core::{AgentId, AgentStatus, ControllerMessage};

use crate::auth;
use crate::ingestion::{self, InboundResult};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    agent_id: Option<String>,
    api_key: Option<String>,
}

fn header_or_query(headers: &HeaderMap, name: &str, query_value: Option<String>) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(query_value)
}

pub async fn session_upgrade(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let external_id = header_or_query(&headers, "X-Agent-Id", query.agent_id);
    let api_key = header_or_query(&headers, "X-Api-Key", query.api_key);

    let (external_id, api_key) = match (external_id, api_key) {
        (Some(id), Some(key)) => (id, key),
        _ => {
            return axum::http::StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let remote_ip = auth::resolve_remote_ip(
        headers.get("X-Forwarded-For").and_then(|v| v.to_str().ok()),
        headers.get("X-Real-IP").and_then(|v| v.to_str().ok()),
        &peer.to_string(),
    );

    let agent = match auth::authenticate(state.store.as_ref(), &state.bootstrap_key, &external_id, &api_key).await {
        Ok(agent) => agent,
        Err(_) => return axum::http::StatusCode::UNAUTHORIZED.into_response(),
    };

    ws.on_upgrade(move |socket| handle_session(state, socket, agent.id, external_id, api_key, remote_ip))
}

async fn handle_session(
    state: AppState,
    socket: WebSocket,
    agent_id: AgentId,
    external_id: String,
    api_key: String,
    remote_ip: String,
) {
    let key_hash = uptimemesh_store::keys::hash_key(&api_key);
    let (handle, mut outbound_rx) = state.sessions.register(agent_id, external_id.clone(), key_hash).await;
    state.external_addr.record(remote_ip.clone()).await;

    if let Err(e) = state
        .store
        .touch_agent(agent_id, AgentStatus::Online, None, Some(&remote_ip))
        .await
    {
        tracing::warn!(agent_id = %agent_id, error = %e, "failed to mark agent online");
    }

    let (mut ws_sink, mut ws_stream) = socket.split();

    let keepalive_interval = state.config.keepalive_interval;
    let liveness_timeout = state.config.liveness_timeout;

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(message) => {
                        if send_json(&mut ws_sink, &message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = ws_stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle.touch();
                        dispatch_message(&state, agent_id, &text, &remote_ip).await;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        handle.touch();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(agent_id = %agent_id, error = %e, "session read error");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(keepalive_interval) => {
                if Utc::now().signed_duration_since(handle.last_seen()).to_std().unwrap_or_default() > liveness_timeout {
                    tracing::info!(agent_id = %agent_id, "session liveness timeout, closing");
                    break;
                }
                let _ = ws_sink.send(Message::Ping(Vec::new().into())).await;
            }
        }
    }

    state.sessions.remove(agent_id).await;
    if let Err(e) = state.store.touch_agent(agent_id, AgentStatus::Offline, None, None).await {
        tracing::warn!(agent_id = %agent_id, error = %e, "failed to mark agent offline");
    }
}

async fn send_json(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    message: &ControllerMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).unwrap_or_default();
    sink.send(Message::Text(text.into())).await
}

async fn dispatch_message(state: &AppState, agent_id: AgentId, text: &str, remote_ip: &str) {
    let message: uptimemesh_core::AgentMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(agent_id = %agent_id, error = %e, "malformed agent message, dropping");
            return;
        }
    };

    use uptimemesh_core::AgentMessage::*;
    match message {
        StatusUpdate { status, os_info, .. } => {
            let _ = state.store.touch_agent(agent_id, status, Some(&os_info), Some(remote_ip)).await;
            state.sessions.send_to(agent_id, ControllerMessage::StatusAck { timestamp: Utc::now() }).await;
        }
        Heartbeat { status, os_info, .. } => {
            let _ = state.store.touch_agent(agent_id, status, os_info.as_ref(), None).await;
            state.sessions.send_to(agent_id, ControllerMessage::HeartbeatAck { timestamp: Utc::now() }).await;
        }
        RequestTasks { .. } => {
            if let Ok(tasks) = state.store.list_enabled_tasks().await {
                state
                    .sessions
                    .send_to(agent_id, ControllerMessage::TaskAssignment { tasks, timestamp: Utc::now() })
                    .await;
            }
        }
        MonitoringResult { task_id, status, response_time, status_code, error_message, metadata, checked_at, .. } => {
            let inbound =
                InboundResult { task_id, status, response_time, status_code, error_message, metadata, checked_at };
            match ingestion::ingest(state.store.as_ref(), agent_id, inbound).await {
                Ok(()) => {
                    state.sessions.send_to(agent_id, ControllerMessage::ResultAck { timestamp: Utc::now() }).await;
                }
                Err(e) => tracing::warn!(agent_id = %agent_id, error = %e, "failed to ingest monitoring result"),
            }
        }
        MonitoringResults { results, .. } => {
            let mut persisted = 0usize;
            for entry in results {
                let inbound = InboundResult {
                    task_id: entry.task_id,
                    status: entry.status,
                    response_time: entry.response_time,
                    status_code: entry.status_code,
                    error_message: entry.error_message,
                    metadata: entry.metadata,
                    checked_at: entry.checked_at,
                };
                match ingestion::ingest(state.store.as_ref(), agent_id, inbound).await {
                    Ok(()) => persisted += 1,
                    Err(e) => tracing::warn!(agent_id = %agent_id, error = %e, "failed to ingest batched result"),
                }
            }
            state
                .sessions
                .send_to(agent_id, ControllerMessage::ResultsAck { count: persisted, timestamp: Utc::now() })
                .await;
        }
    }
}
