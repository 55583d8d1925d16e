// =============================================================================
// Performance Cache — TTL entries in the config store
// =============================================================================
//
// Series are persisted under `gpv_performance_<goalId>` with a fetch
// timestamp. The prefix keeps them outside the sync collector's allowlist,
// so cached series never travel in a sync envelope.
// =============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::series::PerformanceSeries;
use crate::store::ConfigStore;

/// Cache freshness horizon: 7 days, in milliseconds.
pub const PERFORMANCE_TTL_MS: i64 = 7 * 24 * 60 * 60 * 1000;
/// Minimum spacing between UI-initiated force refreshes per goal: 24 h.
pub const FORCE_REFRESH_MIN_INTERVAL_MS: i64 = 24 * 60 * 60 * 1000;

const CACHE_PREFIX: &str = "gpv_performance_";
const REFRESH_PREFIX: &str = "gpv_performance_refresh_";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEntry {
    fetched_at: i64,
    payload: PerformanceSeries,
}

/// TTL cache over the config store.
#[derive(Clone)]
pub struct PerformanceCache {
    store: Arc<ConfigStore>,
}

impl PerformanceCache {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self { store }
    }

    fn cache_key(goal_id: &str) -> String {
        format!("{CACHE_PREFIX}{goal_id}")
    }

    fn refresh_key(goal_id: &str) -> String {
        format!("{REFRESH_PREFIX}{goal_id}")
    }

    /// Fresh series for `goal_id`, if any. A stale entry is removed and
    /// treated as absent.
    pub fn get(&self, goal_id: &str, now_ms: i64) -> Option<PerformanceSeries> {
        let key = Self::cache_key(goal_id);
        let raw = self.store.get(&key)?;
        let entry: CacheEntry = match serde_json::from_value(raw) {
            Ok(e) => e,
            Err(e) => {
                debug!(goal_id, error = %e, "dropping unreadable cache entry");
                self.store.remove(&key);
                return None;
            }
        };

        if now_ms - entry.fetched_at < PERFORMANCE_TTL_MS {
            Some(entry.payload)
        } else {
            debug!(goal_id, fetched_at = entry.fetched_at, "evicting stale cache entry");
            self.store.remove(&key);
            None
        }
    }

    /// Store a freshly fetched series.
    pub fn put(&self, goal_id: &str, series: &PerformanceSeries, now_ms: i64) {
        let entry = CacheEntry {
            fetched_at: now_ms,
            payload: series.clone(),
        };
        if let Ok(value) = serde_json::to_value(&entry) {
            self.store.set(&Self::cache_key(goal_id), value);
        }
    }

    /// Whether a force refresh is currently permitted for `goal_id`.
    pub fn can_force_refresh(&self, goal_id: &str, now_ms: i64) -> bool {
        match self.store.get_i64(&Self::refresh_key(goal_id)) {
            Some(last) => now_ms - last >= FORCE_REFRESH_MIN_INTERVAL_MS,
            None => true,
        }
    }

    /// Record that a force refresh was issued for `goal_id`.
    pub fn record_force_refresh(&self, goal_id: &str, now_ms: i64) {
        self.store
            .set(&Self::refresh_key(goal_id), serde_json::json!(now_ms));
    }
}
