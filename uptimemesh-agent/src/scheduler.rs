//! Task Scheduler Set: a diff-based replace over a map from
//! task id to a running scheduler. Each scheduler owns a single interval
//! timer and pushes probe results to a shared, bounded queue.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uptimemesh_core::{MonitorTask, ResultMetadata, ResultStatus, TaskId};

use crate::{log_analyzer, probes};

const RESULTS_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct QueuedResult {
    pub task_id: TaskId,
    pub status: ResultStatus,
    pub response_time: Option<f64>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub metadata: ResultMetadata,
    pub checked_at: DateTime<Utc>,
}

/// Bounded FIFO shared by every running scheduler and whatever drains it
/// (the session loop or the HTTP fallback submitter). Full queue drops the
/// oldest unsent entry and logs a warning rather than blocking a probe.
#[derive(Clone)]
pub struct ResultsQueue {
    inner: Arc<Mutex<VecDeque<QueuedResult>>>,
}

impl ResultsQueue {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(VecDeque::with_capacity(RESULTS_QUEUE_CAPACITY))) }
    }

    pub async fn push(&self, result: QueuedResult) {
        let mut guard = self.inner.lock().await;
        if guard.len() >= RESULTS_QUEUE_CAPACITY {
            guard.pop_front();
            warn!(task_id = %result.task_id, "results queue full, dropping oldest unsent result");
        }
        guard.push_back(result);
    }

    pub async fn drain(&self, max: usize) -> Vec<QueuedResult> {
        let mut guard = self.inner.lock().await;
        let n = max.min(guard.len());
        guard.drain(..n).collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

impl Default for ResultsQueue {
    fn default() -> Self {
        Self::new()
    }
}

struct RunningScheduler {
    cancel: CancellationToken,
}

/// Executes a single task: immediately, then on every interval tick.
/// Synchronous with respect to its own timer — a slow probe simply delays
/// the next tick rather than overlapping.
async fn run_task(task: MonitorTask, queue: ResultsQueue, cancel: CancellationToken, http_client: reqwest::Client, user_agent: String) {
    let mut ticker = tokio::time::interval(task.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let outcome = execute_probe(&task, &http_client, &user_agent).await;
                queue
                    .push(QueuedResult {
                        task_id: task.id,
                        status: outcome.status,
                        response_time: outcome.response_time,
                        status_code: outcome.status_code,
                        error_message: outcome.error_message,
                        metadata: outcome.metadata,
                        checked_at: Utc::now(),
                    })
                    .await;
            }
        }
    }
}

async fn execute_probe(task: &MonitorTask, http_client: &reqwest::Client, user_agent: &str) -> probes::ProbeOutcome {
    match task.monitor_type {
        uptimemesh_core::MonitorType::Http | uptimemesh_core::MonitorType::Https => {
            probes::http::probe(http_client, &task.url, task.timeout, user_agent).await
        }
        uptimemesh_core::MonitorType::Ping => probes::ping::probe(&task.url, task.timeout).await,
        uptimemesh_core::MonitorType::Log => {
            let Some(log_config) = &task.log_config else {
                return probes::ProbeOutcome {
                    status: ResultStatus::Error,
                    response_time: None,
                    status_code: None,
                    error_message: Some("log task has no log_config".into()),
                    metadata: ResultMetadata::Empty,
                };
            };
            match log_analyzer::analyze(log_config, task.timeout) {
                Ok(metrics) => {
                    let status = log_analyzer::status_for(&metrics);
                    probes::ProbeOutcome {
                        status,
                        response_time: metrics.avg_response_time,
                        status_code: None,
                        error_message: None,
                        metadata: ResultMetadata::Log(metrics),
                    }
                }
                Err(e) => probes::ProbeOutcome {
                    status: ResultStatus::Error,
                    response_time: None,
                    status_code: None,
                    error_message: Some(e.to_string()),
                    metadata: ResultMetadata::Empty,
                },
            }
        }
    }
}

/// Owns the map of active schedulers; the Agent Runtime replaces it
/// atomically (in place, diff-based) whenever a `task_assignment` arrives.
pub struct SchedulerSet {
    running: HashMap<TaskId, RunningScheduler>,
    queue: ResultsQueue,
    http_client: reqwest::Client,
    user_agent: String,
}

impl SchedulerSet {
    pub fn new(queue: ResultsQueue, http_client: reqwest::Client, user_agent: String) -> Self {
        Self { running: HashMap::new(), queue, http_client, user_agent }
    }

    /// Diff-based replace: start schedulers for new enabled
    /// tasks, leave known ones running untouched, stop ones no longer
    /// present or no longer enabled.
    pub fn reconcile(&mut self, tasks: Vec<MonitorTask>) {
        let incoming: HashMap<TaskId, MonitorTask> = tasks.into_iter().filter(|t| t.enabled).map(|t| (t.id, t)).collect();

        let stale: Vec<TaskId> = self.running.keys().copied().filter(|id| !incoming.contains_key(id)).collect();
        for id in stale {
            self.stop(id);
        }

        for (id, task) in incoming {
            if self.running.contains_key(&id) {
                continue;
            }
            let cancel = CancellationToken::new();
            let queue = self.queue.clone();
            let client = self.http_client.clone();
            let user_agent = self.user_agent.clone();
            let child_cancel = cancel.clone();
            tokio::spawn(run_task(task, queue, child_cancel, client, user_agent));
            self.running.insert(id, RunningScheduler { cancel });
        }
    }

    pub fn remove_tasks(&mut self, task_ids: &[TaskId]) {
        for id in task_ids {
            self.stop(*id);
        }
    }

    fn stop(&mut self, id: TaskId) {
        if let Some(scheduler) = self.running.remove(&id) {
            scheduler.cancel.cancel();
        }
    }

    pub fn stop_all(&mut self) {
        let ids: Vec<TaskId> = self.running.keys().copied().collect();
        for id in ids {
            self.stop(id);
        }
    }

    pub fn active_count(&self) -> usize {
        self.running.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use uptimemesh_core::MonitorType;

    fn task(id: i64) -> MonitorTask {
        MonitorTask {
            id: id.into(),
            resource_id: id.into(),
            monitor_type: MonitorType::Http,
            url: "http://127.0.0.1:1".into(),
            interval: StdDuration::from_millis(50),
            timeout: StdDuration::from_millis(50),
            enabled: true,
            log_config: None,
        }
    }

    #[tokio::test]
    async fn reconcile_is_idempotent_for_an_unchanged_task_set() {
        let mut set = SchedulerSet::new(ResultsQueue::new(), reqwest::Client::new(), "test-agent".into());
        set.reconcile(vec![task(1)]);
        assert_eq!(set.active_count(), 1);
        set.reconcile(vec![task(1)]);
        assert_eq!(set.active_count(), 1);
    }

    #[tokio::test]
    async fn removing_a_task_from_the_assignment_stops_its_scheduler() {
        let mut set = SchedulerSet::new(ResultsQueue::new(), reqwest::Client::new(), "test-agent".into());
        set.reconcile(vec![task(1), task(2)]);
        assert_eq!(set.active_count(), 2);
        set.reconcile(vec![task(1)]);
        assert_eq!(set.active_count(), 1);
    }

    #[tokio::test]
    async fn queue_drops_oldest_entry_once_full() {
        let queue = ResultsQueue::new();
        for i in 0..(RESULTS_QUEUE_CAPACITY + 5) {
            queue
                .push(QueuedResult {
                    task_id: (i as i64).into(),
                    status: ResultStatus::Up,
                    response_time: None,
                    status_code: None,
                    error_message: None,
                    metadata: ResultMetadata::Empty,
                    checked_at: Utc::now(),
                })
                .await;
        }
        assert_eq!(queue.len().await, RESULTS_QUEUE_CAPACITY);
        let drained = queue.drain(1).await;
        assert_eq!(drained[0].task_id, TaskId::from(5_i64));
    }
}
