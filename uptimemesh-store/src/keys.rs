//! Key Registry: bootstrap and permanent agent API keys are
//! never stored in plaintext. Only their SHA-256 hash lives in the Store;
//! the plaintext is handed to the agent exactly once, at bootstrap-key
//! provisioning time or at upgrade time.

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::Path;
use uptimemesh_core::{MonitorError, Result};

/// SHA-256 hex digest of `key`. Used both to persist keys and to look one
/// up by the plaintext an agent presents on connect.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// A fresh 32-byte permanent key, hex-encoded.
pub fn generate_permanent_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Reads the bootstrap key from `path`, generating and persisting one
/// (mode 0600 on Unix) if the file does not yet exist. The bootstrap key is
/// shared by every agent that has not yet upgraded to a permanent key;
/// exactly one bootstrap key exists at a time.
pub fn read_or_create_bootstrap_key_file(path: &Path) -> Result<String> {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let trimmed = existing.trim().to_string();
        if !trimmed.is_empty() {
            return Ok(trimmed);
        }
    }

    let key = generate_permanent_key();
    write_key_file(path, &key)?;
    Ok(key)
}

fn write_key_file(path: &Path, key: &str) -> Result<()> {
    std::fs::write(path, key)?;
    set_owner_only_permissions(path)?;
    Ok(())
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Validates that a plaintext key is well-formed before hashing it. Agents
/// that present an empty or absurdly long key are rejected before a
/// database lookup is even attempted.
pub fn validate_key_shape(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(MonitorError::auth("empty API key"));
    }
    if key.len() > 256 {
        return Err(MonitorError::auth("API key too long"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_deterministic() {
        assert_eq!(hash_key("abc"), hash_key("abc"));
        assert_ne!(hash_key("abc"), hash_key("abd"));
        assert_eq!(hash_key("abc").len(), 64);
    }

    #[test]
    fn generated_keys_are_unique() {
        assert_ne!(generate_permanent_key(), generate_permanent_key());
    }

    #[test]
    fn bootstrap_file_is_created_once_and_reused() {
        let dir = std::env::temp_dir().join(format!("uptimemesh-test-{}", generate_permanent_key()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bootstrap.key");

        let first = read_or_create_bootstrap_key_file(&path).unwrap();
        let second = read_or_create_bootstrap_key_file(&path).unwrap();
        assert_eq!(first, second);

        std::fs::remove_dir_all(&dir).ok();
    }
}
