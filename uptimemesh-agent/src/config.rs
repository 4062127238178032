use std::path::PathBuf;
use std::time::Duration;
use uptimemesh_core::{MonitorError, Result};

/// Agent Runtime configuration. A controller URL and an API key are
/// mandatory.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub controller_url: String,
    pub api_key: String,
    pub agent_id: String,
    pub check_interval: Duration,
    pub user_agent: String,
    /// Where the current key is persisted so an upgrade can rewrite it
    /// without re-executing the process — preferred here over an in-place
    /// re-exec, which would have to reconstruct argv from scratch.
    pub key_file_path: Option<PathBuf>,
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.controller_url.trim().is_empty() {
            return Err(MonitorError::validation("controller_url is required"));
        }
        if self.api_key.trim().is_empty() {
            return Err(MonitorError::validation("api_key is required"));
        }
        if self.agent_id.trim().is_empty() {
            return Err(MonitorError::validation("agent_id is required"));
        }
        Ok(())
    }

    /// A key is "canonical length" when it matches the
    /// 64-hex-char shape a freshly generated permanent key has.
    pub fn key_is_canonical_length(&self) -> bool {
        self.api_key.len() == 64 && self.api_key.chars().all(|c| c.is_ascii_hexdigit())
    }

    pub fn session_url(&self) -> String {
        let base = self.controller_url.trim_end_matches('/');
        let ws_base = base.replacen("https://", "wss://", 1).replacen("http://", "ws://", 1);
        format!("{ws_base}/session?agent_id={}&api_key={}", self.agent_id, self.api_key)
    }

    pub fn http_base(&self) -> &str {
        self.controller_url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AgentConfig {
        AgentConfig {
            controller_url: "https://controller.example.com".into(),
            api_key: "a".repeat(64),
            agent_id: "eu-west-1".into(),
            check_interval: Duration::from_secs(30),
            user_agent: "uptimemesh-agent/0.1".into(),
            key_file_path: None,
        }
    }

    #[test]
    fn session_url_rewrites_scheme_to_websocket() {
        assert!(config().session_url().starts_with("wss://controller.example.com/session?"));
    }

    #[test]
    fn canonical_length_detects_64_hex_chars() {
        assert!(config().key_is_canonical_length());
        let mut c = config();
        c.api_key = "short".into();
        assert!(!c.key_is_canonical_length());
    }
}
