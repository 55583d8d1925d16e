// =============================================================================
// Configuration Store — durable key-value state with atomic save
// =============================================================================
//
// Process-local key-value store backing targets, fixed flags, tags,
// portfolios, sync control keys, and the performance cache. Persistence uses
// an atomic tmp + rename pattern to prevent corruption on crash.
//
// Key namespaces (see `sync::envelope` for the synced subset):
//   goal_target_pct_<goalId>   target % for a Platform-A goal
//   goal_fixed_<goalId>        target-lock flag for a Platform-A goal
//   fsm_target_<code>          target % per Platform-B instrument
//   fsm_fixed_<code>           lock flag per Platform-B instrument
//   fsm_tag_<code>             free-text tag per instrument
//   fsm_tag_catalog            global tag list
//   fsm_drift_settings         { warningPct, criticalPct }
//   fsm_portfolios             portfolio definitions
//   fsm_assignment_<code>      portfolio id per instrument
//   api_*                      cached API payloads (never synced)
//   gpv_performance_*          performance series cache (never synced)
//   gpv_projection_*           projected investments (never synced)
//   sync_*                     sync client control state (never synced)
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Durable key-value configuration store.
///
/// All reads and writes go through a `parking_lot::RwLock`. Every mutation
/// persists the full map via an atomic write when a backing path is set, and
/// notifies the registered change listener (the sync client's debounce input).
pub struct ConfigStore {
    entries: RwLock<HashMap<String, Value>>,
    path: Option<PathBuf>,
    change_tx: RwLock<Option<UnboundedSender<String>>>,
}

impl ConfigStore {
    /// Create an in-memory store with no persistence (tests, session-scoped
    /// state).
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            path: None,
            change_tx: RwLock::new(None),
        }
    }

    /// Open a store backed by the JSON file at `path`. A missing file yields
    /// an empty store; a corrupt file is an error so the caller can decide
    /// whether to start fresh.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config store from {}", path.display()))?;
            let map: HashMap<String, Value> = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse config store from {}", path.display()))?;
            info!(path = %path.display(), keys = map.len(), "config store loaded");
            map
        } else {
            debug!(path = %path.display(), "config store file missing — starting empty");
            HashMap::new()
        };

        Ok(Self {
            entries: RwLock::new(entries),
            path: Some(path),
            change_tx: RwLock::new(None),
        })
    }

    /// Register the change listener. Each mutated key is sent on the channel;
    /// the sync client debounces from there.
    pub fn set_change_listener(&self, tx: UnboundedSender<String>) {
        *self.change_tx.write() = Some(tx);
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Fetch the raw value for `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    /// Fetch `key` as a string.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(|s| s.to_string()))
    }

    /// Fetch `key` as a finite f64. Non-numbers and non-finite values are
    /// treated as absent.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key)
            .and_then(|v| v.as_f64())
            .filter(|n| n.is_finite())
    }

    /// Fetch `key` as a bool.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    /// Fetch `key` as an i64.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    /// Snapshot of every key currently in the store.
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Set `key` to `value`, persist, and notify the change listener.
    pub fn set(&self, key: &str, value: Value) {
        {
            let mut entries = self.entries.write();
            entries.insert(key.to_string(), value);
            self.persist_locked(&entries);
        }
        self.notify(key);
    }

    /// Remove `key`, persist, and notify the change listener.
    pub fn remove(&self, key: &str) {
        let existed = {
            let mut entries = self.entries.write();
            let existed = entries.remove(key).is_some();
            if existed {
                self.persist_locked(&entries);
            }
            existed
        };
        if existed {
            self.notify(key);
        }
    }

    /// Apply several writes under a single lock and a single persist. `None`
    /// removes the key. Used where a group of keys must change atomically
    /// (e.g. archiving a portfolio together with its assignment reset).
    pub fn update_many(&self, updates: Vec<(String, Option<Value>)>) {
        if updates.is_empty() {
            return;
        }
        let keys: Vec<String> = updates.iter().map(|(k, _)| k.clone()).collect();
        {
            let mut entries = self.entries.write();
            for (key, value) in updates {
                match value {
                    Some(v) => {
                        entries.insert(key, v);
                    }
                    None => {
                        entries.remove(&key);
                    }
                }
            }
            self.persist_locked(&entries);
        }
        for key in keys {
            self.notify(&key);
        }
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Write the full map to disk using tmp + rename. Persistence failures are
    /// logged, not raised — an overlay must keep working from memory.
    fn persist_locked(&self, entries: &HashMap<String, Value>) {
        let Some(path) = &self.path else {
            return;
        };

        let content = match serde_json::to_string_pretty(entries) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to serialise config store");
                return;
            }
        };

        let tmp_path = path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp_path, &content) {
            warn!(error = %e, path = %tmp_path.display(), "failed to write tmp config store");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp_path, path) {
            warn!(error = %e, path = %path.display(), "failed to rename tmp config store");
        }
    }

    fn notify(&self, key: &str) {
        if let Some(tx) = self.change_tx.read().as_ref() {
            // A closed receiver just means no sync client is listening.
            let _ = tx.send(key.to_string());
        }
    }
}
