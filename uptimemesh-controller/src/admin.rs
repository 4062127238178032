//! Admin API: thin CRUD and read-only listing surface consumed by the
//! dashboard. The dashboard's own UI is a separate concern; this is the
//! programmatic surface any deployed controller needs underneath it.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uptimemesh_analytics::{AnalyticsQuery, ResultRow, SiteMeta};
use uptimemesh_core::{MonitorError, ResourceId};

use crate::reconcile;
use crate::server::AppState;

fn status_code_for(error: &MonitorError) -> StatusCode {
    match error {
        MonitorError::Validation(_) => StatusCode::BAD_REQUEST,
        MonitorError::Auth(_) => StatusCode::UNAUTHORIZED,
        MonitorError::NotFound(_) => StatusCode::NOT_FOUND,
        MonitorError::Conflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn into_response_error(error: MonitorError) -> (StatusCode, Json<serde_json::Value>) {
    let code = status_code_for(&error);
    (code, Json(serde_json::json!({ "error": error.to_string() })))
}

#[derive(Debug, Deserialize)]
pub struct CreateResourceRequest {
    pub url: String,
    pub name: String,
    pub scan_interval: String,
}

pub async fn create_resource(
    State(state): State<AppState>,
    Json(req): Json<CreateResourceRequest>,
) -> Result<Json<uptimemesh_core::Resource>, (StatusCode, Json<serde_json::Value>)> {
    // Validate the URL/interval up front so a bad request never touches the
    // database.
    uptimemesh_catalog::parse_resource_url(&req.url).map_err(into_response_error)?;
    uptimemesh_catalog::parse_scan_interval(&req.scan_interval).map_err(into_response_error)?;

    let resource =
        state.store.create_resource(&req.url, &req.name, &req.scan_interval).await.map_err(into_response_error)?;

    reconcile::reconcile_resource(state.store.as_ref(), &state.sessions, &resource)
        .await
        .map_err(into_response_error)?;

    Ok(Json(resource))
}

pub async fn list_resources(
    State(state): State<AppState>,
) -> Result<Json<Vec<uptimemesh_core::Resource>>, (StatusCode, Json<serde_json::Value>)> {
    Ok(Json(state.store.list_resources().await.map_err(into_response_error)?))
}

pub async fn delete_resource(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, (StatusCode, Json<serde_json::Value>)> {
    reconcile::remove_resource(state.store.as_ref(), &state.sessions, ResourceId::from(id))
        .await
        .map_err(into_response_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_tasks(
    State(state): State<AppState>,
) -> Result<Json<Vec<uptimemesh_core::MonitorTask>>, (StatusCode, Json<serde_json::Value>)> {
    Ok(Json(state.store.list_enabled_tasks().await.map_err(into_response_error)?))
}

pub async fn list_agents(
    State(state): State<AppState>,
) -> Result<Json<Vec<uptimemesh_core::Agent>>, (StatusCode, Json<serde_json::Value>)> {
    Ok(Json(state.store.list_agents().await.map_err(into_response_error)?))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub sites_up: usize,
    pub sites_down: usize,
    pub agents_online: usize,
    pub agents_total: usize,
}

pub async fn stats(
    State(state): State<AppState>,
) -> Result<Json<StatsResponse>, (StatusCode, Json<serde_json::Value>)> {
    let resources = state.store.list_resources().await.map_err(into_response_error)?;
    let recent = state
        .store
        .list_joined_results_since(Utc::now() - chrono::Duration::hours(1))
        .await
        .map_err(into_response_error)?;
    let agents = state.store.list_agents().await.map_err(into_response_error)?;

    let mut sites_up = 0;
    let mut sites_down = 0;
    for resource in &resources {
        let latest = recent.iter().filter(|r| r.resource_id == resource.id).max_by_key(|r| r.checked_at);
        match latest.map(|r| r.status) {
            Some(uptimemesh_core::ResultStatus::Up) => sites_up += 1,
            Some(_) => sites_down += 1,
            None => {}
        }
    }

    let agents_online = agents.iter().filter(|a| crate::auth::is_online(a)).count();

    Ok(Json(StatsResponse { sites_up, sites_down, agents_online, agents_total: agents.len() }))
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsQueryParams {
    pub resource_ids: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub interval_minutes: Option<i64>,
}

pub async fn analytics(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsQueryParams>,
) -> Result<Json<uptimemesh_analytics::AnalyticsResponse>, (StatusCode, Json<serde_json::Value>)> {
    let resource_ids: Vec<ResourceId> = params
        .resource_ids
        .as_deref()
        .unwrap_or("")
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .map(ResourceId::from)
        .collect();

    let start = params.start.unwrap_or_else(|| Utc::now() - chrono::Duration::hours(24));
    let interval_minutes = params.interval_minutes.unwrap_or(5);

    let resources = state.store.list_resources().await.map_err(into_response_error)?;
    let sites: Vec<SiteMeta> =
        resources.iter().map(|r| SiteMeta { id: r.id, name: r.name.clone(), url: r.url.clone() }).collect();

    let joined = state.store.list_joined_results_since(start).await.map_err(into_response_error)?;
    let rows: Vec<ResultRow> = joined
        .into_iter()
        .map(|r| {
            let (error_rate, avg_response_time) = match &r.metadata {
                uptimemesh_core::ResultMetadata::Log(metrics) => {
                    (Some(metrics.error_rate), metrics.avg_response_time)
                }
                _ => (None, None),
            };
            ResultRow {
                resource_id: r.resource_id,
                status: r.status,
                status_code: r.status_code,
                response_time: r.response_time,
                error_rate,
                avg_response_time,
                checked_at: r.checked_at,
            }
        })
        .collect();

    let query = AnalyticsQuery { resource_ids, start, interval_minutes };
    Ok(Json(uptimemesh_analytics::compute(&rows, &sites, &query)))
}

#[derive(Debug, Serialize)]
pub struct BootstrapKeyResponse {
    pub bootstrap_key: String,
}

pub async fn bootstrap_key(State(state): State<AppState>) -> Json<BootstrapKeyResponse> {
    Json(BootstrapKeyResponse { bootstrap_key: state.bootstrap_key.clone() })
}

#[derive(Debug, Serialize)]
pub struct ExternalAddressResponse {
    pub address: Option<String>,
}

/// The most recently observed external hostname/IP this controller was
/// reached at, per spec §5's background refresher. `None` until at least
/// one agent has connected, or once the last observation has aged past
/// its TTL.
pub async fn external_address(State(state): State<AppState>) -> Json<ExternalAddressResponse> {
    Json(ExternalAddressResponse { address: state.external_addr.get().await })
}
