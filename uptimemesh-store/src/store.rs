//! The Store: the only component permitted to talk to the
//! database. Typed operations in, typed domain values out; no monitoring
//! business logic lives here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use uptimemesh_core::{
    Agent, AgentId, AgentStatus, KeyType, LogConfig, MonitorResult, MonitorTask, MonitorType,
    MonitorError, OsInfo, Resource, ResourceId, Result, ResultId, ResultMetadata, ResultStatus,
    TaskId,
};

/// Single local retry delay for a transient write failure (spec §7).
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// SQLite reports contention as `SQLITE_BUSY` (5) or `SQLITE_LOCKED` (6);
/// both clear on their own and are worth one local retry before giving up.
fn is_transient(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_error) if matches!(db_error.code().as_deref(), Some("5") | Some("6")))
}

fn classify_db_error(error: sqlx::Error) -> MonitorError {
    if is_transient(&error) {
        MonitorError::TransientIo(error.to_string())
    } else {
        MonitorError::Database(error)
    }
}

/// A result as produced by a probe, not yet assigned an id.
#[derive(Debug, Clone)]
pub struct NewMonitorResult {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub status: ResultStatus,
    pub response_time: Option<f64>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub metadata: ResultMetadata,
    pub checked_at: DateTime<Utc>,
}

/// A `monitor_results` row joined against its owning task's `resource_id`,
/// the shape the Analytics Engine and the admin API consume.
#[derive(Debug, Clone)]
pub struct JoinedResult {
    pub resource_id: ResourceId,
    pub status: ResultStatus,
    pub status_code: Option<u16>,
    pub response_time: Option<f64>,
    pub metadata: ResultMetadata,
    pub checked_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_resource(&self, url: &str, name: &str, scan_interval: &str) -> Result<Resource>;
    async fn list_resources(&self) -> Result<Vec<Resource>>;
    async fn get_resource(&self, id: ResourceId) -> Result<Resource>;
    async fn delete_resource(&self, id: ResourceId) -> Result<()>;

    async fn upsert_task(&self, task: &MonitorTask) -> Result<MonitorTask>;
    async fn list_enabled_tasks(&self) -> Result<Vec<MonitorTask>>;
    async fn remove_task_for_resource(&self, resource_id: ResourceId) -> Result<()>;

    async fn register_agent(
        &self,
        name: &str,
        api_key_hash: &str,
        key_type: KeyType,
        remote_ip: Option<&str>,
    ) -> Result<Agent>;
    async fn get_agent_by_key_hash(&self, hash: &str) -> Result<Option<Agent>>;
    async fn list_agents(&self) -> Result<Vec<Agent>>;
    async fn touch_agent(
        &self,
        id: AgentId,
        status: AgentStatus,
        os_info: Option<&OsInfo>,
        remote_ip: Option<&str>,
    ) -> Result<()>;
    async fn upgrade_agent_key(&self, id: AgentId, new_key_hash: &str) -> Result<()>;

    async fn insert_result(&self, result: NewMonitorResult) -> Result<MonitorResult>;
    async fn list_joined_results_since(&self, start: DateTime<Utc>) -> Result<Vec<JoinedResult>>;
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn monitor_type_to_str(t: MonitorType) -> &'static str {
    t.as_str()
}

fn monitor_type_from_str(s: &str) -> Result<MonitorType> {
    s.parse()
}

fn key_type_to_str(t: KeyType) -> &'static str {
    match t {
        KeyType::Bootstrap => "bootstrap",
        KeyType::Permanent => "permanent",
    }
}

fn key_type_from_str(s: &str) -> Result<KeyType> {
    match s {
        "bootstrap" => Ok(KeyType::Bootstrap),
        "permanent" => Ok(KeyType::Permanent),
        other => Err(MonitorError::validation(format!("unknown key_type '{other}'"))),
    }
}

fn agent_status_to_str(s: AgentStatus) -> &'static str {
    match s {
        AgentStatus::Online => "online",
        AgentStatus::Offline => "offline",
    }
}

fn agent_status_from_str(s: &str) -> Result<AgentStatus> {
    match s {
        "online" => Ok(AgentStatus::Online),
        "offline" => Ok(AgentStatus::Offline),
        other => Err(MonitorError::validation(format!("unknown agent status '{other}'"))),
    }
}

fn result_status_to_str(s: ResultStatus) -> &'static str {
    match s {
        ResultStatus::Up => "up",
        ResultStatus::Down => "down",
        ResultStatus::Degraded => "degraded",
        ResultStatus::Error => "error",
    }
}

fn result_status_from_str(s: &str) -> Result<ResultStatus> {
    match s {
        "up" => Ok(ResultStatus::Up),
        "down" => Ok(ResultStatus::Down),
        "degraded" => Ok(ResultStatus::Degraded),
        "error" => Ok(ResultStatus::Error),
        other => Err(MonitorError::validation(format!("unknown result status '{other}'"))),
    }
}

fn row_to_resource(row: &sqlx::sqlite::SqliteRow) -> Result<Resource> {
    Ok(Resource {
        id: ResourceId::from(row.try_get::<i64, _>("id")?),
        url: row.try_get("url")?,
        name: row.try_get("name")?,
        scan_interval: row.try_get("scan_interval")?,
        created_at: row.try_get::<String, _>("created_at")?.parse::<DateTime<Utc>>().map_err(|e| {
            MonitorError::validation(format!("corrupt created_at: {e}"))
        })?,
    })
}

fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<MonitorTask> {
    let log_config: Option<String> = row.try_get("log_config")?;
    Ok(MonitorTask {
        id: TaskId::from(row.try_get::<i64, _>("id")?),
        resource_id: ResourceId::from(row.try_get::<i64, _>("resource_id")?),
        monitor_type: monitor_type_from_str(&row.try_get::<String, _>("monitor_type")?)?,
        url: row.try_get("url")?,
        interval: std::time::Duration::from_secs(row.try_get::<i64, _>("interval_secs")? as u64),
        timeout: std::time::Duration::from_secs(row.try_get::<i64, _>("timeout_secs")? as u64),
        enabled: row.try_get::<i64, _>("enabled")? != 0,
        log_config: match log_config {
            Some(raw) => Some(serde_json::from_str::<LogConfig>(&raw)?),
            None => None,
        },
    })
}

fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> Result<Agent> {
    let os_info: Option<String> = row.try_get("os_info")?;
    let last_seen: Option<String> = row.try_get("last_seen")?;
    Ok(Agent {
        id: AgentId::from(row.try_get::<i64, _>("id")?),
        name: row.try_get("name")?,
        api_key_hash: row.try_get("api_key_hash")?,
        key_type: key_type_from_str(&row.try_get::<String, _>("key_type")?)?,
        description: row.try_get("description")?,
        last_seen: last_seen
            .map(|s| s.parse::<DateTime<Utc>>())
            .transpose()
            .map_err(|e| MonitorError::validation(format!("corrupt last_seen: {e}")))?,
        status: agent_status_from_str(&row.try_get::<String, _>("status")?)?,
        os_info: match os_info {
            Some(raw) => Some(serde_json::from_str::<OsInfo>(&raw)?),
            None => None,
        },
        remote_ip: row.try_get("remote_ip")?,
        created_at: row.try_get::<String, _>("created_at")?.parse::<DateTime<Utc>>().map_err(|e| {
            MonitorError::validation(format!("corrupt created_at: {e}"))
        })?,
    })
}

fn row_to_result(row: &sqlx::sqlite::SqliteRow) -> Result<MonitorResult> {
    Ok(MonitorResult {
        id: ResultId::from(row.try_get::<i64, _>("id")?),
        task_id: TaskId::from(row.try_get::<i64, _>("task_id")?),
        agent_id: AgentId::from(row.try_get::<i64, _>("agent_id")?),
        status: result_status_from_str(&row.try_get::<String, _>("status")?)?,
        response_time: row.try_get("response_time")?,
        status_code: row.try_get::<Option<i64>, _>("status_code")?.map(|c| c as u16),
        error_message: row.try_get("error_message")?,
        metadata: serde_json::from_str(&row.try_get::<String, _>("metadata")?)?,
        checked_at: row.try_get::<String, _>("checked_at")?.parse::<DateTime<Utc>>().map_err(|e| {
            MonitorError::validation(format!("corrupt checked_at: {e}"))
        })?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_resource(&self, url: &str, name: &str, scan_interval: &str) -> Result<Resource> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO resources (url, name, scan_interval, created_at) VALUES (?, ?, ?, ?) RETURNING *",
        )
        .bind(url)
        .bind(name)
        .bind(scan_interval)
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        row_to_resource(&row)
    }

    async fn list_resources(&self) -> Result<Vec<Resource>> {
        let rows = sqlx::query("SELECT * FROM resources ORDER BY id").fetch_all(&self.pool).await?;
        rows.iter().map(row_to_resource).collect()
    }

    async fn get_resource(&self, id: ResourceId) -> Result<Resource> {
        let row = sqlx::query("SELECT * FROM resources WHERE id = ?")
            .bind(i64::from(id))
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MonitorError::not_found(format!("resource {id}")))?;
        row_to_resource(&row)
    }

    async fn delete_resource(&self, id: ResourceId) -> Result<()> {
        let outcome = sqlx::query("DELETE FROM resources WHERE id = ?")
            .bind(i64::from(id))
            .execute(&self.pool)
            .await?;
        if outcome.rows_affected() == 0 {
            return Err(MonitorError::not_found(format!("resource {id}")));
        }
        Ok(())
    }

    async fn upsert_task(&self, task: &MonitorTask) -> Result<MonitorTask> {
        let log_config = task.log_config.as_ref().map(serde_json::to_string).transpose()?;
        let row = sqlx::query(
            "INSERT INTO monitor_tasks (resource_id, monitor_type, url, interval_secs, timeout_secs, enabled, log_config)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(resource_id) DO UPDATE SET
                monitor_type = excluded.monitor_type,
                url = excluded.url,
                interval_secs = excluded.interval_secs,
                timeout_secs = excluded.timeout_secs,
                enabled = excluded.enabled,
                log_config = excluded.log_config
             RETURNING *",
        )
        .bind(i64::from(task.resource_id))
        .bind(monitor_type_to_str(task.monitor_type))
        .bind(&task.url)
        .bind(task.interval.as_secs() as i64)
        .bind(task.timeout.as_secs() as i64)
        .bind(task.enabled as i64)
        .bind(log_config)
        .fetch_one(&self.pool)
        .await?;
        row_to_task(&row)
    }

    async fn list_enabled_tasks(&self) -> Result<Vec<MonitorTask>> {
        let rows = sqlx::query("SELECT * FROM monitor_tasks WHERE enabled = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn remove_task_for_resource(&self, resource_id: ResourceId) -> Result<()> {
        sqlx::query("DELETE FROM monitor_tasks WHERE resource_id = ?")
            .bind(i64::from(resource_id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn register_agent(
        &self,
        name: &str,
        api_key_hash: &str,
        key_type: KeyType,
        remote_ip: Option<&str>,
    ) -> Result<Agent> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO agents (name, api_key_hash, key_type, status, remote_ip, created_at)
             VALUES (?, ?, ?, 'offline', ?, ?) RETURNING *",
        )
        .bind(name)
        .bind(api_key_hash)
        .bind(key_type_to_str(key_type))
        .bind(remote_ip)
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        row_to_agent(&row)
    }

    async fn get_agent_by_key_hash(&self, hash: &str) -> Result<Option<Agent>> {
        let row = sqlx::query("SELECT * FROM agents WHERE api_key_hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_agent).transpose()
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY id").fetch_all(&self.pool).await?;
        rows.iter().map(row_to_agent).collect()
    }

    async fn touch_agent(
        &self,
        id: AgentId,
        status: AgentStatus,
        os_info: Option<&OsInfo>,
        remote_ip: Option<&str>,
    ) -> Result<()> {
        let os_info = os_info.map(serde_json::to_string).transpose()?;
        let last_seen = Utc::now().to_rfc3339();
        let touch = || {
            sqlx::query(
                "UPDATE agents SET status = ?, last_seen = ?, os_info = COALESCE(?, os_info), remote_ip = COALESCE(?, remote_ip) WHERE id = ?",
            )
            .bind(agent_status_to_str(status))
            .bind(last_seen.clone())
            .bind(os_info.clone())
            .bind(remote_ip)
            .bind(i64::from(id))
            .execute(&self.pool)
        };
        match touch().await {
            Ok(_) => Ok(()),
            Err(e) if is_transient(&e) => {
                tracing::warn!(error = %e, "transient database error touching agent, retrying once");
                tokio::time::sleep(WRITE_RETRY_DELAY).await;
                touch().await.map_err(classify_db_error)?;
                Ok(())
            }
            Err(e) => Err(classify_db_error(e)),
        }
    }

    async fn upgrade_agent_key(&self, id: AgentId, new_key_hash: &str) -> Result<()> {
        sqlx::query("UPDATE agents SET api_key_hash = ?, key_type = 'permanent' WHERE id = ?")
            .bind(new_key_hash)
            .bind(i64::from(id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_result(&self, result: NewMonitorResult) -> Result<MonitorResult> {
        let metadata = serde_json::to_string(&result.metadata)?;
        let insert = || {
            sqlx::query(
                "INSERT INTO monitor_results (task_id, agent_id, status, response_time, status_code, error_message, metadata, checked_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
            )
            .bind(i64::from(result.task_id))
            .bind(i64::from(result.agent_id))
            .bind(result_status_to_str(result.status))
            .bind(result.response_time)
            .bind(result.status_code.map(|c| c as i64))
            .bind(result.error_message.clone())
            .bind(metadata.clone())
            .bind(result.checked_at.to_rfc3339())
            .fetch_one(&self.pool)
        };
        let row = match insert().await {
            Ok(row) => row,
            Err(e) if is_transient(&e) => {
                tracing::warn!(error = %e, "transient database error inserting result, retrying once");
                tokio::time::sleep(WRITE_RETRY_DELAY).await;
                insert().await.map_err(classify_db_error)?
            }
            Err(e) => return Err(classify_db_error(e)),
        };
        row_to_result(&row)
    }

    async fn list_joined_results_since(&self, start: DateTime<Utc>) -> Result<Vec<JoinedResult>> {
        let rows = sqlx::query(
            "SELECT mr.status, mr.status_code, mr.response_time, mr.metadata, mr.checked_at, mt.resource_id
             FROM monitor_results mr
             JOIN monitor_tasks mt ON mt.id = mr.task_id
             WHERE mr.checked_at >= ?
             ORDER BY mr.checked_at ASC",
        )
        .bind(start.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(JoinedResult {
                    resource_id: ResourceId::from(row.try_get::<i64, _>("resource_id")?),
                    status: result_status_from_str(&row.try_get::<String, _>("status")?)?,
                    status_code: row.try_get::<Option<i64>, _>("status_code")?.map(|c| c as u16),
                    response_time: row.try_get("response_time")?,
                    metadata: serde_json::from_str(&row.try_get::<String, _>("metadata")?)?,
                    checked_at: row
                        .try_get::<String, _>("checked_at")?
                        .parse::<DateTime<Utc>>()
                        .map_err(|e| MonitorError::validation(format!("corrupt checked_at: {e}")))?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uptimemesh_core::KeyType;

    async fn test_store() -> SqliteStore {
        let pool = crate::pool::connect(":memory:").await.unwrap();
        SqliteStore::new(pool)
    }

    #[tokio::test]
    async fn resource_round_trips_and_is_listed() {
        let store = test_store().await;
        let created = store.create_resource("https://example.com", "example", "30s").await.unwrap();
        let fetched = store.get_resource(created.id).await.unwrap();
        assert_eq!(created, fetched);
        assert_eq!(store.list_resources().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleting_resource_cascades_to_its_task() {
        let store = test_store().await;
        let resource = store.create_resource("https://example.com", "example", "30s").await.unwrap();
        let task = uptimemesh_catalog_task_stub(resource.id);
        store.upsert_task(&task).await.unwrap();
        assert_eq!(store.list_enabled_tasks().await.unwrap().len(), 1);

        store.delete_resource(resource.id).await.unwrap();
        assert_eq!(store.list_enabled_tasks().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn upserting_task_twice_keeps_exactly_one_row_per_resource() {
        let store = test_store().await;
        let resource = store.create_resource("https://example.com", "example", "30s").await.unwrap();
        let mut task = uptimemesh_catalog_task_stub(resource.id);
        store.upsert_task(&task).await.unwrap();
        task.interval = std::time::Duration::from_secs(60);
        store.upsert_task(&task).await.unwrap();

        let tasks = store.list_enabled_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].interval, std::time::Duration::from_secs(60));
    }

    #[tokio::test]
    async fn agent_key_upgrade_changes_hash_and_type() {
        let store = test_store().await;
        let agent = store.register_agent("agent-1", "bootstraphash", KeyType::Bootstrap, None).await.unwrap();
        store.upgrade_agent_key(agent.id, "permanenthash").await.unwrap();

        let refreshed = store.get_agent_by_key_hash("permanenthash").await.unwrap().unwrap();
        assert_eq!(refreshed.key_type, KeyType::Permanent);
        assert!(store.get_agent_by_key_hash("bootstraphash").await.unwrap().is_none());
    }

    fn uptimemesh_catalog_task_stub(resource_id: ResourceId) -> MonitorTask {
        MonitorTask {
            id: TaskId::from(0),
            resource_id,
            monitor_type: MonitorType::Https,
            url: "https://example.com".to_string(),
            interval: std::time::Duration::from_secs(30),
            timeout: std::time::Duration::from_secs(30),
            enabled: true,
            log_config: None,
        }
    }
}
