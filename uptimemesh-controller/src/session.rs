//! Session Manager: the controller-side half of the
//! persistent agent connection. Owns the single map of live
//! [`AgentSessionInfo`]-equivalent handles; every mutation to that map goes
//! through this type rather than being scattered across callers.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uptimemesh_core::{AgentId, ControllerMessage};

/// A connected agent's outbound channel and liveness bookkeeping.
///
/// `last_seen` is a plain atomic rather than data behind the map's lock:
/// heartbeats only need a read lock to find the handle, then update their
/// own timestamp without contending with fan-out broadcasts.
pub struct SessionHandle {
    pub external_id: String,
    pub key_hash: String,
    pub connected_at: DateTime<Utc>,
    last_seen_unix: AtomicI64,
    sender: mpsc::Sender<ControllerMessage>,
}

impl SessionHandle {
    pub fn touch(&self) {
        self.last_seen_unix.store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_seen_unix.load(Ordering::Relaxed), 0).unwrap_or(self.connected_at)
    }

    pub async fn send(&self, message: ControllerMessage, deadline: Duration) -> bool {
        tokio::time::timeout(deadline, self.sender.send(message)).await.is_ok_and(|r| r.is_ok())
    }
}

#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<AgentId, Arc<SessionHandle>>>>,
    write_deadline: Duration,
}

impl SessionManager {
    pub fn new(write_deadline: Duration) -> Self {
        Self { sessions: Arc::new(RwLock::new(HashMap::new())), write_deadline }
    }

    /// Registers a new session for `agent_id`, evicting and closing any
    /// prior session for the same id.
    pub async fn register(
        &self,
        agent_id: AgentId,
        external_id: String,
        key_hash: String,
    ) -> (Arc<SessionHandle>, mpsc::Receiver<ControllerMessage>) {
        let (tx, rx) = mpsc::channel(32);
        let now = Utc::now();
        let handle = Arc::new(SessionHandle {
            external_id,
            key_hash,
            connected_at: now,
            last_seen_unix: AtomicI64::new(now.timestamp()),
            sender: tx,
        });

        let previous = {
            let mut sessions = self.sessions.write().await;
            sessions.insert(agent_id, handle.clone())
        };
        if let Some(previous) = previous {
            previous
                .send(ControllerMessage::ServerShutdown { reason: "superseded".into(), timestamp: now }, self.write_deadline)
                .await;
        }

        (handle, rx)
    }

    pub async fn remove(&self, agent_id: AgentId) {
        self.sessions.write().await.remove(&agent_id);
    }

    /// Sends `message` to one agent's session. Returns `false` (and leaves
    /// cleanup to the caller) if the session is gone or the write deadline
    /// elapsed.
    pub async fn send_to(&self, agent_id: AgentId, message: ControllerMessage) -> bool {
        let handle = self.sessions.read().await.get(&agent_id).cloned();
        match handle {
            Some(handle) => handle.send(message, self.write_deadline).await,
            None => false,
        }
    }

    /// Broadcasts `message` to every connected session. A failure on one
    /// session never affects delivery to the others.
    pub async fn broadcast(&self, message: ControllerMessage) {
        let handles: Vec<Arc<SessionHandle>> = self.sessions.read().await.values().cloned().collect();
        for handle in handles {
            handle.send(message.clone(), self.write_deadline).await;
        }
    }

    /// Sessions whose `last_seen` predates `now - timeout`.
    pub async fn stale_sessions(&self, timeout: Duration) -> Vec<AgentId> {
        let cutoff = Utc::now() - chrono::Duration::from_std(timeout).unwrap_or_default();
        self.sessions
            .read()
            .await
            .iter()
            .filter(|(_, handle)| handle.last_seen() < cutoff)
            .map(|(id, _)| *id)
            .collect()
    }

    pub async fn shutdown_all(&self, reason: &str) {
        self.broadcast(ControllerMessage::ServerShutdown { reason: reason.to_string(), timestamp: Utc::now() }).await;
    }

    pub async fn connected_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registering_twice_for_the_same_agent_evicts_the_first_session() {
        let manager = SessionManager::new(Duration::from_secs(1));
        let agent = AgentId::from(1);
        let (_first, mut first_rx) = manager.register(agent, "eu-west-1".into(), "hash".into()).await;
        let (_second, _second_rx) = manager.register(agent, "eu-west-1".into(), "hash".into()).await;

        let evict_message = first_rx.recv().await;
        assert!(matches!(evict_message, Some(ControllerMessage::ServerShutdown { .. })));
        assert_eq!(manager.connected_count().await, 1);
    }

    #[tokio::test]
    async fn broadcast_failure_on_one_session_does_not_affect_another() {
        let manager = SessionManager::new(Duration::from_millis(50));
        let agent_a = AgentId::from(1);
        let agent_b = AgentId::from(2);
        let (_a, mut rx_a) = manager.register(agent_a, "a".into(), "hash-a".into()).await;
        let (_b, mut rx_b) = manager.register(agent_b, "b".into(), "hash-b".into()).await;

        // Fill agent A's bounded channel so its send times out, but agent B
        // still receives the broadcast.
        for _ in 0..32 {
            let _ = manager.send_to(agent_a, ControllerMessage::HeartbeatAck { timestamp: Utc::now() }).await;
        }

        manager.broadcast(ControllerMessage::HeartbeatAck { timestamp: Utc::now() }).await;
        assert!(rx_b.recv().await.is_some());
        drop(rx_a);
    }
}
