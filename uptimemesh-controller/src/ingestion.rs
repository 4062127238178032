//! Ingestion Pipeline: validates inbound results and persists them, turning
//! wire-protocol result fields into a [`NewMonitorResult`] written through
//! the Store.
//!
//! Log-monitor metadata already carries its precomputed `error_rate` and
//! `avg_response_time` (the Agent's Log Analyzer did that work); this
//! pipeline never re-derives them.

use chrono::{DateTime, Utc};
use uptimemesh_core::{AgentId, MonitorError, ResultMetadata, ResultStatus, Result, TaskId};
use uptimemesh_store::{NewMonitorResult, Store};

pub struct InboundResult {
    pub task_id: i64,
    pub status: ResultStatus,
    pub response_time: Option<f64>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub metadata: Option<ResultMetadata>,
    pub checked_at: i64,
}

pub async fn ingest(store: &dyn Store, agent_id: AgentId, result: InboundResult) -> Result<()> {
    let checked_at = DateTime::<Utc>::from_timestamp(result.checked_at, 0)
        .ok_or_else(|| MonitorError::validation("checked_at out of range"))?;

    let new_result = NewMonitorResult {
        task_id: TaskId::from(result.task_id),
        agent_id,
        status: result.status,
        response_time: result.response_time,
        status_code: result.status_code,
        error_message: result.error_message,
        metadata: result.metadata.unwrap_or_default(),
        checked_at,
    };

    store.insert_result(new_result).await?;
    Ok(())
}
