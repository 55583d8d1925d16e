// =============================================================================
// View Models — summary and bucket-detail assembly
// =============================================================================
//
// Builders here output plain data only; renderers inject controls and write
// edits back into the config store. Overrides (targets, fixed flags,
// projections) are snapshotted first so the builders themselves stay pure.
//
// Projected investments are keyed per bucket × goal-type with URL-safe
// encoded parts, so separator characters in bucket or type names cannot
// corrupt the key. They are session-scoped unless explicitly persisted and
// never synced.
// =============================================================================

use std::collections::BTreeMap;

use serde::Serialize;

use super::targets::{
    goal_drift, group_drift, remaining_needs_flag, remaining_target_pct, DriftInput,
    GOAL_FIXED_PREFIX, GOAL_TARGET_PREFIX,
};
use crate::model::{growth_percent, BucketMap};
use crate::store::ConfigStore;

const PROJECTION_PREFIX: &str = "gpv_projection_";

// =============================================================================
// Projection keys
// =============================================================================

/// Percent-encode everything outside `[A-Za-z0-9]`.
fn url_safe_encode(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for byte in part.bytes() {
        if byte.is_ascii_alphanumeric() {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Storage key for a bucket × goal-type projected investment.
pub fn encode_projection_key(bucket: &str, goal_type_label: &str) -> String {
    format!(
        "{PROJECTION_PREFIX}{}_{}",
        url_safe_encode(bucket),
        url_safe_encode(goal_type_label)
    )
}

/// Read a projected amount; absent or non-finite reads as 0.
pub fn projection_amount(store: &ConfigStore, bucket: &str, goal_type_label: &str) -> f64 {
    store
        .get_f64(&encode_projection_key(bucket, goal_type_label))
        .unwrap_or(0.0)
}

/// Persist or clear a projected amount.
pub fn set_projection(
    store: &ConfigStore,
    bucket: &str,
    goal_type_label: &str,
    amount: Option<f64>,
) {
    let key = encode_projection_key(bucket, goal_type_label);
    match amount.filter(|n| n.is_finite()) {
        Some(amount) => store.set(&key, serde_json::json!(amount)),
        None => store.remove(&key),
    }
}

// =============================================================================
// Overrides snapshot
// =============================================================================

/// Snapshot of every override the builders need, read once from the store.
#[derive(Debug, Clone, Default)]
pub struct GoalOverrides {
    pub targets: BTreeMap<String, f64>,
    pub fixed: BTreeMap<String, bool>,
    /// Keyed by [`encode_projection_key`].
    pub projections: BTreeMap<String, f64>,
}

/// Collect targets, fixed flags, and projections for the goals in `map`.
pub fn collect_overrides(store: &ConfigStore, map: &BucketMap) -> GoalOverrides {
    let mut overrides = GoalOverrides::default();

    for goal in map.goals() {
        if let Some(pct) = store.get_f64(&format!("{GOAL_TARGET_PREFIX}{}", goal.goal_id)) {
            overrides.targets.insert(goal.goal_id.clone(), pct);
        }
        if let Some(true) = store.get_bool(&format!("{GOAL_FIXED_PREFIX}{}", goal.goal_id)) {
            overrides.fixed.insert(goal.goal_id.clone(), true);
        }
    }

    for (bucket_name, bucket) in &map.buckets {
        for goal_type in bucket.groups.keys() {
            let key = encode_projection_key(bucket_name, goal_type.label());
            if let Some(amount) = store.get_f64(&key) {
                overrides.projections.insert(key, amount);
            }
        }
    }

    overrides
}

// =============================================================================
// Summary view
// =============================================================================

/// One bucket line in the summary view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketSummary {
    pub name: String,
    pub ending_balance: f64,
    pub cumulative_return: f64,
    pub growth_percent: f64,
    pub goal_count: usize,
}

/// The summary view: bucket totals plus the grand total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryViewModel {
    pub total_ending_balance: f64,
    pub buckets: Vec<BucketSummary>,
}

/// Pure summary assembly.
pub fn build_summary_view_model(map: &BucketMap) -> SummaryViewModel {
    let buckets = map
        .buckets
        .iter()
        .map(|(name, bucket)| {
            let cumulative_return: f64 = bucket
                .groups
                .values()
                .map(|g| g.total_cumulative_return)
                .sum();
            BucketSummary {
                name: name.clone(),
                ending_balance: bucket.ending_balance_total,
                cumulative_return,
                growth_percent: growth_percent(bucket.ending_balance_total, cumulative_return),
                goal_count: bucket.groups.values().map(|g| g.goals.len()).sum(),
            }
        })
        .collect();

    SummaryViewModel {
        total_ending_balance: map.ending_balance_grand_total(),
        buckets,
    }
}

// =============================================================================
// Bucket detail view
// =============================================================================

/// One goal row in the bucket detail view.
#[derive(Debug, Clone, Serialize)]
pub struct GoalRow {
    pub goal_id: String,
    pub goal_name: String,
    pub ending_balance: Option<f64>,
    pub cumulative_return: Option<f64>,
    pub growth_percent: Option<f64>,
    pub simple_return_percent: Option<f64>,
    /// This goal's share of the group balance, in percent.
    pub share_pct: Option<f64>,
    pub target_pct: Option<f64>,
    pub fixed: bool,
    pub drift: Option<f64>,
}

/// One goal-type group within the bucket detail view.
#[derive(Debug, Clone, Serialize)]
pub struct GroupView {
    pub goal_type: String,
    pub ending_balance: f64,
    pub cumulative_return: f64,
    pub growth_percent: f64,
    pub remaining_target_pct: Option<f64>,
    pub remaining_flagged: bool,
    pub drift: Option<f64>,
    pub projected_amount: f64,
    pub projected_ending_balance: f64,
    pub goals: Vec<GoalRow>,
}

/// The bucket detail view.
#[derive(Debug, Clone, Serialize)]
pub struct BucketDetailViewModel {
    pub bucket_name: String,
    pub ending_balance_total: f64,
    pub groups: Vec<GroupView>,
}

/// Pure bucket-detail assembly. `None` when the bucket does not exist.
pub fn build_bucket_detail(
    map: &BucketMap,
    bucket_name: &str,
    overrides: &GoalOverrides,
) -> Option<BucketDetailViewModel> {
    let bucket = map.buckets.get(bucket_name)?;

    let groups = bucket
        .groups
        .iter()
        .map(|(goal_type, group)| {
            let total = group.ending_balance_amount;

            let mut rows = Vec::with_capacity(group.goals.len());
            let mut drift_inputs = Vec::with_capacity(group.goals.len());

            for goal in &group.goals {
                let actual = goal.ending_balance_amount.unwrap_or(0.0);
                let share_pct = (total > 0.0).then(|| actual / total * 100.0);
                let fixed = overrides.fixed.get(&goal.goal_id).copied().unwrap_or(false);
                // A fixed goal shows its locked target; the lock falls back
                // to the live share if the stored value is missing.
                let target_pct = match (overrides.targets.get(&goal.goal_id).copied(), fixed) {
                    (Some(stored), _) => Some(stored),
                    (None, true) => share_pct,
                    (None, false) => None,
                };

                let drift = target_pct
                    .and_then(|pct| goal_drift(actual, total * pct / 100.0));

                drift_inputs.push(DriftInput {
                    actual_amount: actual,
                    target_pct,
                });

                let growth = match (goal.ending_balance_amount, goal.total_cumulative_return) {
                    (Some(balance), Some(ret)) => Some(growth_percent(balance, ret)),
                    _ => None,
                };

                rows.push(GoalRow {
                    goal_id: goal.goal_id.clone(),
                    goal_name: goal.goal_name.clone(),
                    ending_balance: goal.ending_balance_amount,
                    cumulative_return: goal.total_cumulative_return,
                    growth_percent: growth,
                    simple_return_percent: goal.simple_rate_of_return_percent,
                    share_pct,
                    target_pct,
                    fixed,
                    drift,
                });
            }

            let assigned: Vec<f64> = rows.iter().filter_map(|r| r.target_pct).collect();
            let remaining = (!assigned.is_empty()).then(|| remaining_target_pct(&assigned));

            let projection_key = encode_projection_key(bucket_name, goal_type.label());
            let projected_amount = overrides
                .projections
                .get(&projection_key)
                .copied()
                .unwrap_or(0.0);

            GroupView {
                goal_type: goal_type.label().to_string(),
                ending_balance: total,
                cumulative_return: group.total_cumulative_return,
                growth_percent: growth_percent(total, group.total_cumulative_return),
                remaining_target_pct: remaining,
                remaining_flagged: remaining.map(remaining_needs_flag).unwrap_or(false),
                drift: group_drift(&drift_inputs, total),
                projected_amount,
                projected_ending_balance: total + projected_amount,
                goals: rows,
            }
        })
        .collect();

    Some(BucketDetailViewModel {
        bucket_name: bucket_name.to_string(),
        ending_balance_total: bucket.ending_balance_total,
        groups,
    })
}
