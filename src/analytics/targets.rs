// =============================================================================
// Targets & Drift — user overrides and allocation math
// =============================================================================
//
// Targets are percentages (0–100, two decimals) persisted per goal or per
// instrument. A fixed goal locks its target to its current allocation share
// and is excluded from further editing. Drift compares actual amounts with
// target amounts; group drift is the sum of absolute per-item drifts.
// =============================================================================

use std::sync::Arc;

use serde_json::json;

use crate::store::ConfigStore;

pub const GOAL_TARGET_PREFIX: &str = "goal_target_pct_";
pub const GOAL_FIXED_PREFIX: &str = "goal_fixed_";
pub const FSM_TARGET_PREFIX: &str = "fsm_target_";
pub const FSM_FIXED_PREFIX: &str = "fsm_fixed_";

/// |remaining| above this is flagged in the UI.
pub const REMAINING_FLAG_THRESHOLD: f64 = 2.0;

/// Clamp a target into 0–100 and round to two decimals.
pub fn round_target(pct: f64) -> f64 {
    (pct.clamp(0.0, 100.0) * 100.0).round() / 100.0
}

/// `100 − Σ assigned targets` for a goal type.
pub fn remaining_target_pct(assigned: &[f64]) -> f64 {
    100.0 - assigned.iter().sum::<f64>()
}

/// Whether the remaining value should be flagged (|remaining| > 2%).
pub fn remaining_needs_flag(remaining: f64) -> bool {
    remaining.abs() > REMAINING_FLAG_THRESHOLD
}

// =============================================================================
// Drift
// =============================================================================

/// Per-goal drift ratio: `actual / target − 1`. A goal whose target amount
/// is not positive is excluded; a zero-balance goal with a positive target
/// drifts by exactly −1.
pub fn goal_drift(actual_amount: f64, target_amount: f64) -> Option<f64> {
    if !(actual_amount.is_finite() && target_amount.is_finite()) || target_amount <= 0.0 {
        return None;
    }
    Some(actual_amount / target_amount - 1.0)
}

/// One goal's contribution to group drift.
#[derive(Debug, Clone, Copy)]
pub struct DriftInput {
    pub actual_amount: f64,
    pub target_pct: Option<f64>,
}

/// Group drift: `Σ |drift_i|` over goals with configured targets.
///
/// Emitted only when at least one target is configured and the remaining
/// target is not negative (an over-allocated group has no meaningful drift).
pub fn group_drift(goals: &[DriftInput], total_invested: f64) -> Option<f64> {
    let assigned: Vec<f64> = goals.iter().filter_map(|g| g.target_pct).collect();
    if assigned.is_empty() || remaining_target_pct(&assigned) < 0.0 {
        return None;
    }

    let mut sum = 0.0;
    for goal in goals {
        let Some(pct) = goal.target_pct else { continue };
        let target_amount = total_invested * pct / 100.0;
        if let Some(drift) = goal_drift(goal.actual_amount, target_amount) {
            sum += drift.abs();
        }
    }
    Some(sum)
}

// =============================================================================
// Store accessors
// =============================================================================

/// Typed access to target and fixed-flag keys in the config store.
#[derive(Clone)]
pub struct TargetStore {
    store: Arc<ConfigStore>,
}

impl TargetStore {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self { store }
    }

    // ---- Platform A --------------------------------------------------------

    pub fn goal_target(&self, goal_id: &str) -> Option<f64> {
        self.store.get_f64(&format!("{GOAL_TARGET_PREFIX}{goal_id}"))
    }

    /// Set or clear a goal target. Editing a fixed goal is rejected by
    /// returning `false`.
    pub fn set_goal_target(&self, goal_id: &str, pct: Option<f64>) -> bool {
        if self.goal_fixed(goal_id) {
            return false;
        }
        let key = format!("{GOAL_TARGET_PREFIX}{goal_id}");
        match pct {
            Some(pct) if pct.is_finite() => self.store.set(&key, json!(round_target(pct))),
            _ => self.store.remove(&key),
        }
        true
    }

    pub fn goal_fixed(&self, goal_id: &str) -> bool {
        self.store
            .get_bool(&format!("{GOAL_FIXED_PREFIX}{goal_id}"))
            .unwrap_or(false)
    }

    /// Fix or unfix a goal. Fixing locks the target to the goal's current
    /// allocation share.
    pub fn set_goal_fixed(&self, goal_id: &str, fixed: bool, current_share_pct: Option<f64>) {
        let fixed_key = format!("{GOAL_FIXED_PREFIX}{goal_id}");
        if fixed {
            let mut updates = vec![(fixed_key, Some(json!(true)))];
            if let Some(share) = current_share_pct.filter(|n| n.is_finite()) {
                updates.push((
                    format!("{GOAL_TARGET_PREFIX}{goal_id}"),
                    Some(json!(round_target(share))),
                ));
            }
            self.store.update_many(updates);
        } else {
            self.store.remove(&fixed_key);
        }
    }

    // ---- Platform B --------------------------------------------------------

    pub fn instrument_target(&self, code: &str) -> Option<f64> {
        self.store.get_f64(&format!("{FSM_TARGET_PREFIX}{code}"))
    }

    pub fn set_instrument_target(&self, code: &str, pct: Option<f64>) -> bool {
        if self.instrument_fixed(code) {
            return false;
        }
        let key = format!("{FSM_TARGET_PREFIX}{code}");
        match pct {
            Some(pct) if pct.is_finite() => self.store.set(&key, json!(round_target(pct))),
            _ => self.store.remove(&key),
        }
        true
    }

    pub fn instrument_fixed(&self, code: &str) -> bool {
        self.store
            .get_bool(&format!("{FSM_FIXED_PREFIX}{code}"))
            .unwrap_or(false)
    }

    pub fn set_instrument_fixed(&self, code: &str, fixed: bool, current_share_pct: Option<f64>) {
        let fixed_key = format!("{FSM_FIXED_PREFIX}{code}");
        if fixed {
            let mut updates = vec![(fixed_key, Some(json!(true)))];
            if let Some(share) = current_share_pct.filter(|n| n.is_finite()) {
                updates.push((
                    format!("{FSM_TARGET_PREFIX}{code}"),
                    Some(json!(round_target(share))),
                ));
            }
            self.store.update_many(updates);
        } else {
            self.store.remove(&fixed_key);
        }
    }
}
