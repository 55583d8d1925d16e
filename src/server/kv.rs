// =============================================================================
// KV Store — shared mutable state behind get/put/delete
// =============================================================================
//
// All server-side state (user credentials, encrypted blobs, rate-limit
// windows) lives in a key-value namespace accessed through this trait. The
// in-memory implementation backs tests and ephemeral deployments; the
// file-backed one persists with the atomic tmp + rename pattern.
//
// Key layout:
//   user:<userId>                                credential record
//   sync_user:<userId>                           encrypted blob record
//   ratelimit:<identity>:<routePattern>:<method> sliding window counter
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Server-side records are addressed by plain string keys.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn put(&self, key: &str, value: Value);
    fn delete(&self, key: &str);
}

/// Credential record under `user:<userId>`. The hash is the client-supplied
/// SHA-256 hex; the service never sees a plaintext password.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub password_hash: String,
    pub created_at: i64,
}

/// Encrypted blob record under `sync_user:<userId>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub encrypted_data: String,
    pub device_id: String,
    pub timestamp: i64,
    pub version: u32,
}

pub fn user_key(user_id: &str) -> String {
    format!("user:{user_id}")
}

pub fn sync_key(user_id: &str) -> String {
    format!("sync_user:{user_id}")
}

pub fn ratelimit_key(identity: &str, route_pattern: &str, method: &str) -> String {
    format!("ratelimit:{identity}:{route_pattern}:{method}")
}

// =============================================================================
// In-memory implementation
// =============================================================================

/// Volatile store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryKv {
    map: RwLock<HashMap<String, Value>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Option<Value> {
        self.map.read().get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) {
        self.map.write().insert(key.to_string(), value);
    }

    fn delete(&self, key: &str) {
        self.map.write().remove(key);
    }
}

// =============================================================================
// File-backed implementation
// =============================================================================

/// JSON-file-backed store with atomic persistence on every mutation.
pub struct FileKv {
    map: RwLock<HashMap<String, Value>>,
    path: PathBuf,
}

impl FileKv {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let map = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read kv store from {}", path.display()))?;
            let map: HashMap<String, Value> = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse kv store from {}", path.display()))?;
            info!(path = %path.display(), keys = map.len(), "kv store loaded");
            map
        } else {
            HashMap::new()
        };
        Ok(Self {
            map: RwLock::new(map),
            path,
        })
    }

    fn persist(&self, map: &HashMap<String, Value>) {
        let content = match serde_json::to_string(map) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to serialise kv store");
                return;
            }
        };
        let tmp = self.path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp, &content) {
            warn!(error = %e, path = %tmp.display(), "failed to write tmp kv store");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            warn!(error = %e, path = %self.path.display(), "failed to rename tmp kv store");
        }
    }
}

impl KvStore for FileKv {
    fn get(&self, key: &str) -> Option<Value> {
        self.map.read().get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) {
        let mut map = self.map.write();
        map.insert(key.to_string(), value);
        self.persist(&map);
    }

    fn delete(&self, key: &str) {
        let mut map = self.map.write();
        if map.remove(key).is_some() {
            self.persist(&map);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_kv_roundtrip() {
        let kv = MemoryKv::new();
        kv.put("user:alice", json!({ "passwordHash": "ab", "createdAt": 1 }));
        assert!(kv.get("user:alice").is_some());
        kv.delete("user:alice");
        assert!(kv.get("user:alice").is_none());
    }

    #[test]
    fn file_kv_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.json");
        {
            let kv = FileKv::open(&path).unwrap();
            kv.put("sync_user:alice", json!({ "timestamp": 42 }));
        }
        let kv = FileKv::open(&path).unwrap();
        assert_eq!(kv.get("sync_user:alice").unwrap()["timestamp"], 42);
    }

    #[test]
    fn key_builders() {
        assert_eq!(user_key("alice"), "user:alice");
        assert_eq!(sync_key("alice"), "sync_user:alice");
        assert_eq!(
            ratelimit_key("alice", "/sync/:userId", "GET"),
            "ratelimit:alice:/sync/:userId:GET"
        );
    }

    #[test]
    fn record_shapes_are_camel_case() {
        let record = SyncRecord {
            encrypted_data: "AAAA".into(),
            device_id: "d1".into(),
            timestamp: 7,
            version: 2,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("encryptedData").is_some());
        assert!(value.get("deviceId").is_some());
    }
}
