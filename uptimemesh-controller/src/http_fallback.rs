//! HTTP Fallback endpoints: the degraded path an Agent
//! uses when the bidirectional session cannot be established. Semantics
//! mirror the session handler; the controller auto-registers the agent on
//! first checkin exactly as `ws::session_upgrade` does.

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uptimemesh_core::{AgentStatus, MonitorTask, OsInfo};

use crate::ingestion::{self, InboundResult};
use crate::server::AppState;
use crate::auth;

fn api_key_from_headers(headers: &HeaderMap) -> Option<String> {
    headers.get("X-Api-Key").and_then(|v| v.to_str().ok()).map(str::to_string)
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
pub struct CheckinRequest {
    pub agent_id: String,
    pub status: AgentStatus,
    pub os_info: Option<OsInfo>,
}

#[derive(Debug, Serialize)]
pub struct CheckinResponse {
    pub acknowledged: bool,
}

pub async fn checkin(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<CheckinRequest>,
) -> Result<Json<CheckinResponse>, StatusCode> {
    let api_key = api_key_from_headers(&headers).ok_or(StatusCode::UNAUTHORIZED)?;
    let agent = auth::authenticate(state.store.as_ref(), &state.bootstrap_key, &req.agent_id, &api_key)
        .await
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let remote_ip = auth::resolve_remote_ip(
        headers.get("X-Forwarded-For").and_then(|v| v.to_str().ok()),
        headers.get("X-Real-IP").and_then(|v| v.to_str().ok()),
        &peer.to_string(),
    );
    state.external_addr.record(remote_ip.clone()).await;

    state
        .store
        .touch_agent(agent.id, req.status, req.os_info.as_ref(), Some(&remote_ip))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(CheckinResponse { acknowledged: true }))
}

#[derive(Debug, Deserialize)]
pub struct UpgradeKeyRequest {
    pub agent_id: String,
    pub current_key: String,
}

#[derive(Debug, Serialize)]
pub struct UpgradeKeyResponse {
    pub api_key: String,
}

pub async fn upgrade_key(
    State(state): State<AppState>,
    Json(req): Json<UpgradeKeyRequest>,
) -> Result<Json<UpgradeKeyResponse>, StatusCode> {
    let _ = req.agent_id;
    let new_key =
        auth::upgrade_key(state.store.as_ref(), &req.current_key).await.map_err(|_| StatusCode::UNAUTHORIZED)?;
    Ok(Json(UpgradeKeyResponse { api_key: new_key }))
}

pub async fn monitoring_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<MonitorTask>>, StatusCode> {
    let api_key = api_key_from_headers(&headers).ok_or(StatusCode::UNAUTHORIZED)?;
    let hash = uptimemesh_store::keys::hash_key(&api_key);
    state
        .store
        .get_agent_by_key_hash(&hash)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    Ok(Json(state.store.list_enabled_tasks().await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?))
}

#[derive(Debug, Deserialize)]
pub struct SubmitResult {
    pub agent_id: String,
    pub task_id: i64,
    pub status: uptimemesh_core::ResultStatus,
    pub response_time: Option<f64>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub metadata: Option<uptimemesh_core::ResultMetadata>,
    pub checked_at: i64,
}

pub async fn monitoring_results(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(results): Json<Vec<SubmitResult>>,
) -> Result<StatusCode, StatusCode> {
    let api_key = api_key_from_headers(&headers).ok_or(StatusCode::UNAUTHORIZED)?;
    let hash = uptimemesh_store::keys::hash_key(&api_key);
    let agent = state
        .store
        .get_agent_by_key_hash(&hash)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    for result in results {
        let inbound = InboundResult {
            task_id: result.task_id,
            status: result.status,
            response_time: result.response_time,
            status_code: result.status_code,
            error_message: result.error_message,
            metadata: result.metadata,
            checked_at: result.checked_at,
        };
        if let Err(e) = ingestion::ingest(state.store.as_ref(), agent.id, inbound).await {
            tracing::warn!(agent_id = %agent.id, error = %e, "failed to ingest fallback result");
        }
    }

    Ok(StatusCode::ACCEPTED)
}
