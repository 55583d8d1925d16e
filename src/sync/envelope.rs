// =============================================================================
// Sync Envelope — platform-namespaced configuration schema (v2)
// =============================================================================
//
// The plaintext payload of a sync upload. Collection is allowlist-driven:
// only the recognised key patterns below are read out of the config store,
// so cached API payloads (`api_*`, `gpv_performance_*`), projections, and
// sync control keys can never leak into an envelope. No amount-bearing or
// personally identifying field exists in this schema.
//
// Reads of a v1 envelope `{goalTargets, goalFixed}` are promoted to
// `platforms.platformA`; writes are always v2.
// =============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::analytics::portfolios::{DriftSettings, Portfolio, UNASSIGNED};
use crate::analytics::targets::{
    FSM_FIXED_PREFIX, FSM_TARGET_PREFIX, GOAL_FIXED_PREFIX, GOAL_TARGET_PREFIX,
};
use crate::store::ConfigStore;

/// Current envelope schema version. Writes are always this version.
pub const SYNC_SCHEMA_VERSION: u32 = 2;

const PORTFOLIOS_KEY: &str = "fsm_portfolios";
const TAG_CATALOG_KEY: &str = "fsm_tag_catalog";
const DRIFT_SETTINGS_KEY: &str = "fsm_drift_settings";
const TAG_PREFIX: &str = "fsm_tag_";
const ASSIGNMENT_PREFIX: &str = "fsm_assignment_";

// =============================================================================
// Schema
// =============================================================================

/// Platform-A synced configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlatformAConfig {
    pub goal_targets: BTreeMap<String, f64>,
    pub goal_fixed: BTreeMap<String, bool>,
}

/// Platform-B synced configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlatformBConfig {
    pub targets_by_code: BTreeMap<String, f64>,
    pub fixed_by_code: BTreeMap<String, bool>,
    pub tags_by_code: BTreeMap<String, String>,
    pub tag_catalog: Vec<String>,
    pub drift_settings: Option<DriftSettings>,
    pub portfolios: Vec<Portfolio>,
    pub assignment_by_code: BTreeMap<String, String>,
}

/// Both platform namespaces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Platforms {
    pub platform_a: PlatformAConfig,
    pub platform_b: PlatformBConfig,
}

/// Envelope metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvelopeMetadata {
    pub last_modified: i64,
}

/// The full (plaintext) sync envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncEnvelope {
    pub version: u32,
    pub platforms: Platforms,
    pub metadata: EnvelopeMetadata,
}

// =============================================================================
// Key recognition
// =============================================================================

/// Whether a config-store key participates in sync collection. Exact keys
/// are checked before prefixes: `fsm_tag_catalog` must not read as a tag for
/// a code named "catalog".
pub fn is_synced_key(key: &str) -> bool {
    matches!(key, PORTFOLIOS_KEY | TAG_CATALOG_KEY | DRIFT_SETTINGS_KEY)
        || key.starts_with(GOAL_TARGET_PREFIX)
        || key.starts_with(GOAL_FIXED_PREFIX)
        || key.starts_with(FSM_TARGET_PREFIX)
        || key.starts_with(FSM_FIXED_PREFIX)
        || key.starts_with(TAG_PREFIX)
        || key.starts_with(ASSIGNMENT_PREFIX)
}

// =============================================================================
// Promote (v1 → v2)
// =============================================================================

/// Parse a decrypted envelope, promoting the legacy flat v1 shape
/// `{goalTargets, goalFixed}` into `platforms.platformA`. `None` when the
/// value matches neither schema.
pub fn promote(value: &Value) -> Option<SyncEnvelope> {
    if value.get("platforms").is_some() {
        return match serde_json::from_value::<SyncEnvelope>(value.clone()) {
            Ok(mut envelope) => {
                envelope.version = SYNC_SCHEMA_VERSION;
                Some(envelope)
            }
            Err(e) => {
                debug!(error = %e, "v2 envelope rejected");
                None
            }
        };
    }

    if value.get("goalTargets").is_some() || value.get("goalFixed").is_some() {
        let platform_a: PlatformAConfig = match serde_json::from_value(value.clone()) {
            Ok(cfg) => cfg,
            Err(e) => {
                debug!(error = %e, "v1 envelope rejected");
                return None;
            }
        };
        let last_modified = value
            .get("metadata")
            .and_then(|m| m.get("lastModified"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        return Some(SyncEnvelope {
            version: SYNC_SCHEMA_VERSION,
            platforms: Platforms {
                platform_a,
                platform_b: PlatformBConfig::default(),
            },
            metadata: EnvelopeMetadata { last_modified },
        });
    }

    None
}

// =============================================================================
// Collect
// =============================================================================

/// Build a v2 envelope from the config store. Only defined values are
/// included; a fixed goal or instrument contributes its flag but never a
/// target percentage, so two devices cannot conflict on a locked value.
pub fn collect(store: &ConfigStore, now_ms: i64) -> SyncEnvelope {
    let mut envelope = SyncEnvelope {
        version: SYNC_SCHEMA_VERSION,
        metadata: EnvelopeMetadata {
            last_modified: now_ms,
        },
        ..Default::default()
    };
    let a = &mut envelope.platforms.platform_a;
    let b = &mut envelope.platforms.platform_b;

    for key in store.keys() {
        // Exact keys first; their names collide with the tag prefix.
        match key.as_str() {
            PORTFOLIOS_KEY => {
                if let Some(list) = store.get(&key).and_then(|v| from_value_opt(v)) {
                    b.portfolios = list;
                }
                continue;
            }
            TAG_CATALOG_KEY => {
                if let Some(catalog) = store.get(&key).and_then(|v| from_value_opt(v)) {
                    b.tag_catalog = catalog;
                }
                continue;
            }
            DRIFT_SETTINGS_KEY => {
                b.drift_settings = store.get(&key).and_then(|v| from_value_opt(v));
                continue;
            }
            _ => {}
        }

        if let Some(goal_id) = key.strip_prefix(GOAL_TARGET_PREFIX) {
            let fixed = store
                .get_bool(&format!("{GOAL_FIXED_PREFIX}{goal_id}"))
                .unwrap_or(false);
            if !fixed {
                if let Some(pct) = store.get_f64(&key) {
                    a.goal_targets.insert(goal_id.to_string(), pct);
                }
            }
        } else if let Some(goal_id) = key.strip_prefix(GOAL_FIXED_PREFIX) {
            if let Some(fixed) = store.get_bool(&key) {
                a.goal_fixed.insert(goal_id.to_string(), fixed);
            }
        } else if let Some(code) = key.strip_prefix(FSM_TARGET_PREFIX) {
            let fixed = store
                .get_bool(&format!("{FSM_FIXED_PREFIX}{code}"))
                .unwrap_or(false);
            if !fixed {
                if let Some(pct) = store.get_f64(&key) {
                    b.targets_by_code.insert(code.to_string(), pct);
                }
            }
        } else if let Some(code) = key.strip_prefix(FSM_FIXED_PREFIX) {
            if let Some(fixed) = store.get_bool(&key) {
                b.fixed_by_code.insert(code.to_string(), fixed);
            }
        } else if let Some(code) = key.strip_prefix(ASSIGNMENT_PREFIX) {
            if let Some(id) = store.get_str(&key) {
                b.assignment_by_code.insert(code.to_string(), id);
            }
        } else if let Some(code) = key.strip_prefix(TAG_PREFIX) {
            if let Some(tag) = store.get_str(&key) {
                b.tags_by_code.insert(code.to_string(), tag);
            }
        }
    }

    envelope
}

fn from_value_opt<T: serde::de::DeserializeOwned>(value: Value) -> Option<T> {
    serde_json::from_value(value).ok()
}

// =============================================================================
// Apply
// =============================================================================

/// Write an envelope into the config store. Missing incoming keys are not
/// deletions, and out-of-namespace local state is untouched. All writes land
/// in one store transaction.
pub fn apply(envelope: &SyncEnvelope, store: &ConfigStore) {
    let mut updates: Vec<(String, Option<Value>)> = Vec::new();
    let a = &envelope.platforms.platform_a;
    let b = &envelope.platforms.platform_b;

    for (goal_id, pct) in &a.goal_targets {
        updates.push((format!("{GOAL_TARGET_PREFIX}{goal_id}"), Some(json!(pct))));
    }
    for (goal_id, fixed) in &a.goal_fixed {
        updates.push((format!("{GOAL_FIXED_PREFIX}{goal_id}"), Some(json!(fixed))));
    }

    for (code, pct) in &b.targets_by_code {
        updates.push((format!("{FSM_TARGET_PREFIX}{code}"), Some(json!(pct))));
    }
    for (code, fixed) in &b.fixed_by_code {
        updates.push((format!("{FSM_FIXED_PREFIX}{code}"), Some(json!(fixed))));
    }
    for (code, tag) in &b.tags_by_code {
        updates.push((format!("{TAG_PREFIX}{code}"), Some(json!(tag))));
    }
    for (code, id) in &b.assignment_by_code {
        // The reserved id and a missing key are equivalent.
        if id == UNASSIGNED {
            updates.push((format!("{ASSIGNMENT_PREFIX}{code}"), None));
        } else {
            updates.push((format!("{ASSIGNMENT_PREFIX}{code}"), Some(json!(id))));
        }
    }
    if !b.tag_catalog.is_empty() {
        updates.push((TAG_CATALOG_KEY.to_string(), Some(json!(b.tag_catalog))));
    }
    if let Some(settings) = &b.drift_settings {
        if let Ok(value) = serde_json::to_value(settings) {
            updates.push((DRIFT_SETTINGS_KEY.to_string(), Some(value)));
        }
    }
    if !b.portfolios.is_empty() {
        if let Ok(value) = serde_json::to_value(&b.portfolios) {
            updates.push((PORTFOLIOS_KEY.to_string(), Some(value)));
        }
    }

    store.update_many(updates);
}

// =============================================================================
// Content hash
// =============================================================================

/// SHA-256 of the canonical (sorted-key) JSON of the platform payload.
/// Metadata is excluded so identical configuration always hashes alike, which
/// is what lets the client skip no-op uploads.
pub fn content_hash(envelope: &SyncEnvelope) -> String {
    // serde_json maps iterate in sorted key order, so Value round-tripping
    // canonicalises the object.
    let canonical = serde_json::to_value(&envelope.platforms)
        .map(|v| v.to_string())
        .unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}
