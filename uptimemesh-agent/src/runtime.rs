//! Agent Runtime: the top-level orchestration that ties
//! config validation, the opportunistic key upgrade, the session client,
//! and the HTTP fallback together.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uptimemesh_core::{MonitorError, Result};

use crate::config::AgentConfig;
use crate::http_fallback;
use crate::scheduler::{ResultsQueue, SchedulerSet};
use crate::session;

const SESSION_RETRY_DELAY: Duration = Duration::from_secs(2);
const SESSION_FAILURE_FALLBACK_THRESHOLD: u32 = 3;

#[derive(Debug, Serialize)]
struct UpgradeKeyRequest {
    agent_id: String,
    current_key: String,
}

#[derive(Debug, Deserialize)]
struct UpgradeKeyResponse {
    api_key: String,
}

/// Best-effort key upgrade. A failure here is never
/// fatal: the Runtime simply continues with the current key.
async fn attempt_key_upgrade(config: &mut AgentConfig, client: &reqwest::Client) {
    if !config.key_is_canonical_length() {
        return;
    }

    let result = client
        .post(format!("{}/agents/upgrade-key", config.http_base()))
        .json(&UpgradeKeyRequest { agent_id: config.agent_id.clone(), current_key: config.api_key.clone() })
        .send()
        .await;

    let response = match result {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            info!(status = %r.status(), "key upgrade declined, continuing with current key");
            return;
        }
        Err(e) => {
            info!(error = %e, "key upgrade request failed, continuing with current key");
            return;
        }
    };

    match response.json::<UpgradeKeyResponse>().await {
        Ok(body) => {
            persist_key(config, &body.api_key);
            config.api_key = body.api_key;
            info!("upgraded to a permanent key");
        }
        Err(e) => warn!(error = %e, "key upgrade response was malformed, continuing with current key"),
    }
}

fn persist_key(config: &AgentConfig, new_key: &str) {
    let Some(path) = &config.key_file_path else { return };
    if let Err(e) = std::fs::write(path, new_key) {
        warn!(error = %e, path = %path.display(), "failed to persist upgraded key");
        return;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
            warn!(error = %e, "failed to restrict permissions on key file");
        }
    }
}

fn build_http_client(config: &AgentConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| MonitorError::Probe(format!("failed to build HTTP client: {e}")))
}

/// Drives the Runtime until `cancel` fires or a clean shutdown is
/// negotiated. On cancellation, a final `status_update{offline}` is sent
/// by whichever transport (session or fallback) is currently active.
pub async fn run(mut config: AgentConfig, cancel: CancellationToken) -> Result<()> {
    config.validate()?;

    let http_client = build_http_client(&config)?;
    attempt_key_upgrade(&mut config, &http_client).await;

    let queue = ResultsQueue::new();
    let schedulers = Arc::new(Mutex::new(SchedulerSet::new(queue.clone(), http_client.clone(), config.user_agent.clone())));

    let mut consecutive_failures = 0u32;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if consecutive_failures < SESSION_FAILURE_FALLBACK_THRESHOLD {
            match session::run_session(&config, schedulers.clone(), queue.clone(), cancel.clone()).await {
                Ok(()) => break,
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(error = %e, attempt = consecutive_failures, "session failed");
                    tokio::time::sleep(SESSION_RETRY_DELAY).await;
                }
            }
        } else {
            info!("repeated session failures, falling back to HTTP polling");
            http_fallback::run(&config, schedulers.clone(), queue.clone(), http_client.clone(), cancel.clone()).await;
            break;
        }
    }

    schedulers.lock().await.stop_all();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config() -> AgentConfig {
        AgentConfig {
            controller_url: "http://127.0.0.1:1".into(),
            api_key: "a".repeat(64),
            agent_id: "test-agent".into(),
            check_interval: Duration::from_secs(30),
            user_agent: "uptimemesh-agent/test".into(),
            key_file_path: None,
        }
    }

    #[tokio::test]
    async fn key_upgrade_is_skipped_for_a_non_canonical_key() {
        let mut cfg = config();
        cfg.api_key = "short-key".into();
        let client = build_http_client(&cfg).unwrap();
        attempt_key_upgrade(&mut cfg, &client).await;
        assert_eq!(cfg.api_key, "short-key");
    }

    #[test]
    fn persisting_a_key_writes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.key");
        let mut cfg = config();
        cfg.key_file_path = Some(PathBuf::from(&path));
        persist_key(&cfg, "new-key-value");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new-key-value");
    }
}
