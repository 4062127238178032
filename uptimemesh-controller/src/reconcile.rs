//! Reconciles the Task Catalog against the Store and fans the result out
//! to connected agents: exactly one task exists per resource at all times,
//! and task mutations trigger `task_assignment`/`task_removal` broadcasts.

use chrono::Utc;
use uptimemesh_core::{ControllerMessage, Resource, Result, TaskId};
use uptimemesh_store::Store;

use crate::session::SessionManager;

/// Derives and upserts the task for `resource`, then broadcasts the full
/// current enabled task list to every connected agent. Every task goes to
/// every agent: the data model has no per-agent assignment concept.
pub async fn reconcile_resource(store: &dyn Store, sessions: &SessionManager, resource: &Resource) -> Result<()> {
    let task = uptimemesh_catalog::derive_task(resource, TaskId::from(0))?;
    store.upsert_task(&task).await?;
    broadcast_current_tasks(store, sessions).await
}

pub async fn broadcast_current_tasks(store: &dyn Store, sessions: &SessionManager) -> Result<()> {
    let tasks = store.list_enabled_tasks().await?;
    sessions.broadcast(ControllerMessage::TaskAssignment { tasks, timestamp: Utc::now() }).await;
    Ok(())
}

/// Removes the resource's task (implicitly, via resource deletion cascade)
/// and tells every agent to drop it.
pub async fn remove_resource(store: &dyn Store, sessions: &SessionManager, resource_id: uptimemesh_core::ResourceId) -> Result<()> {
    let removed_task_ids: Vec<i64> = store
        .list_enabled_tasks()
        .await?
        .into_iter()
        .filter(|t| t.resource_id == resource_id)
        .map(|t| i64::from(t.id))
        .collect();

    store.delete_resource(resource_id).await?;

    if !removed_task_ids.is_empty() {
        sessions.broadcast(ControllerMessage::TaskRemoval { task_ids: removed_task_ids, timestamp: Utc::now() }).await;
    }
    Ok(())
}
