//! Credential extraction and the bootstrap-auto-registration rule shared
//! by the session upgrade handler and the HTTP fallback endpoints.

use uptimemesh_core::{Agent, AgentStatus, KeyType, MonitorError, Result};
use uptimemesh_store::{keys, Store};

/// Authenticates `presented_key` for `external_agent_id`, auto-creating an
/// Agent row the first time the deployment's bootstrap key is presented.
pub async fn authenticate(
    store: &dyn Store,
    bootstrap_key: &str,
    external_agent_id: &str,
    presented_key: &str,
) -> Result<Agent> {
    keys::validate_key_shape(presented_key)?;
    let hash = keys::hash_key(presented_key);

    if let Some(agent) = store.get_agent_by_key_hash(&hash).await? {
        return Ok(agent);
    }

    if presented_key == bootstrap_key {
        return store
            .register_agent(&format!("Agent-{external_agent_id}"), &hash, KeyType::Bootstrap, None)
            .await;
    }

    Err(MonitorError::auth("unknown API key"))
}

/// Bootstrap→permanent key upgrade. Refuses unless the
/// presented key hashes to a row currently typed `bootstrap`.
pub async fn upgrade_key(store: &dyn Store, current_key: &str) -> Result<String> {
    let hash = keys::hash_key(current_key);
    let agent = store
        .get_agent_by_key_hash(&hash)
        .await?
        .ok_or_else(|| MonitorError::auth("unknown API key"))?;

    if agent.key_type != KeyType::Bootstrap {
        return Err(MonitorError::auth("key is not eligible for upgrade"));
    }

    let new_key = keys::generate_permanent_key();
    let new_hash = keys::hash_key(&new_key);
    store.upgrade_agent_key(agent.id, &new_hash).await?;
    Ok(new_key)
}

/// `X-Forwarded-For` (first hop) -> `X-Real-IP` -> socket peer.
pub fn resolve_remote_ip(forwarded_for: Option<&str>, real_ip: Option<&str>, socket_peer: &str) -> String {
    if let Some(chain) = forwarded_for {
        if let Some(first) = chain.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }
    if let Some(real_ip) = real_ip {
        if !real_ip.trim().is_empty() {
            return real_ip.trim().to_string();
        }
    }
    socket_peer.to_string()
}

pub fn is_online(agent: &Agent) -> bool {
    agent.status == AgentStatus::Online
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_ip_prefers_forwarded_for_first_hop() {
        let ip = resolve_remote_ip(Some("203.0.113.1, 10.0.0.1"), Some("10.0.0.2"), "127.0.0.1:9000");
        assert_eq!(ip, "203.0.113.1");
    }

    #[test]
    fn remote_ip_falls_back_to_real_ip_then_socket_peer() {
        assert_eq!(resolve_remote_ip(None, Some("198.51.100.2"), "127.0.0.1:9000"), "198.51.100.2");
        assert_eq!(resolve_remote_ip(None, None, "127.0.0.1:9000"), "127.0.0.1:9000");
    }
}
