// =============================================================================
// Conflict Wizard — five-step resolution state machine
// =============================================================================
//
// A 409 routes the user through a finite state machine:
//
//   Summary → Definitions → Assignments → Targets → Decision
//
// rather than a chain of awaited callbacks. The diff and any pending
// selection live in the machine's state, so backward navigation loses
// nothing. Resolution is binary: keep this device (force upload) or use the
// server (apply then re-upload normally).
// =============================================================================

use serde::Serialize;
use serde_json::Value;

use super::envelope::SyncEnvelope;
use crate::analytics::portfolios::Portfolio;

/// Wizard steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WizardStep {
    Summary,
    Definitions,
    Assignments,
    Targets,
    Decision,
}

impl WizardStep {
    fn index(self) -> usize {
        match self {
            Self::Summary => 0,
            Self::Definitions => 1,
            Self::Assignments => 2,
            Self::Targets => 3,
            Self::Decision => 4,
        }
    }

    const ORDER: [WizardStep; 5] = [
        Self::Summary,
        Self::Definitions,
        Self::Assignments,
        Self::Targets,
        Self::Decision,
    ];
}

/// The user's final choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Resolution {
    /// Re-upload local state with `force: true`.
    KeepThisDevice,
    /// Apply the server envelope locally, then upload normally.
    UseServer,
}

// =============================================================================
// Diff
// =============================================================================

/// A portfolio definition that differs between the two sides.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioChange {
    pub id: String,
    pub local: Option<Portfolio>,
    pub remote: Option<Portfolio>,
}

/// An instrument whose portfolio assignment differs.
#[derive(Debug, Clone, Serialize)]
pub struct AssignmentChange {
    pub code: String,
    pub local: Option<String>,
    pub remote: Option<String>,
}

/// A target, fixed flag, or drift setting that differs, tagged by platform.
#[derive(Debug, Clone, Serialize)]
pub struct SettingChange {
    pub platform: &'static str,
    pub key: String,
    pub local: Option<Value>,
    pub remote: Option<Value>,
}

/// Step-1 category counts.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConflictSummary {
    pub portfolio_changes: usize,
    pub assignment_changes: usize,
    pub setting_changes: usize,
}

/// Everything that differs between the local and remote envelopes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConflictDiff {
    pub portfolios: Vec<PortfolioChange>,
    pub assignments: Vec<AssignmentChange>,
    pub settings: Vec<SettingChange>,
}

impl ConflictDiff {
    pub fn compute(local: &SyncEnvelope, remote: &SyncEnvelope) -> Self {
        let mut diff = Self::default();

        // ---- Portfolio definitions ----------------------------------------
        let local_b = &local.platforms.platform_b;
        let remote_b = &remote.platforms.platform_b;

        let mut portfolio_ids: Vec<&String> = local_b
            .portfolios
            .iter()
            .chain(remote_b.portfolios.iter())
            .map(|p| &p.id)
            .collect();
        portfolio_ids.sort();
        portfolio_ids.dedup();

        for id in portfolio_ids {
            let local_p = local_b.portfolios.iter().find(|p| &p.id == id).cloned();
            let remote_p = remote_b.portfolios.iter().find(|p| &p.id == id).cloned();
            if local_p != remote_p {
                diff.portfolios.push(PortfolioChange {
                    id: id.clone(),
                    local: local_p,
                    remote: remote_p,
                });
            }
        }

        // ---- Assignments ---------------------------------------------------
        let mut codes: Vec<&String> = local_b
            .assignment_by_code
            .keys()
            .chain(remote_b.assignment_by_code.keys())
            .collect();
        codes.sort();
        codes.dedup();
        for code in codes {
            let local_a = local_b.assignment_by_code.get(code).cloned();
            let remote_a = remote_b.assignment_by_code.get(code).cloned();
            if local_a != remote_a {
                diff.assignments.push(AssignmentChange {
                    code: code.clone(),
                    local: local_a,
                    remote: remote_a,
                });
            }
        }

        // ---- Targets / flags / drift settings, grouped by platform ---------
        let local_a_cfg = &local.platforms.platform_a;
        let remote_a_cfg = &remote.platforms.platform_a;

        diff_map(&mut diff.settings, "platformA", "target", &local_a_cfg.goal_targets, &remote_a_cfg.goal_targets);
        diff_map(&mut diff.settings, "platformA", "fixed", &local_a_cfg.goal_fixed, &remote_a_cfg.goal_fixed);
        diff_map(&mut diff.settings, "platformB", "target", &local_b.targets_by_code, &remote_b.targets_by_code);
        diff_map(&mut diff.settings, "platformB", "fixed", &local_b.fixed_by_code, &remote_b.fixed_by_code);

        if local_b.drift_settings != remote_b.drift_settings {
            diff.settings.push(SettingChange {
                platform: "platformB",
                key: "driftSettings".to_string(),
                local: local_b.drift_settings.and_then(|s| serde_json::to_value(s).ok()),
                remote: remote_b.drift_settings.and_then(|s| serde_json::to_value(s).ok()),
            });
        }

        diff
    }

    pub fn summary(&self) -> ConflictSummary {
        ConflictSummary {
            portfolio_changes: self.portfolios.len(),
            assignment_changes: self.assignments.len(),
            setting_changes: self.settings.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.portfolios.is_empty() && self.assignments.is_empty() && self.settings.is_empty()
    }
}

fn diff_map<T: PartialEq + Clone + Serialize>(
    out: &mut Vec<SettingChange>,
    platform: &'static str,
    kind: &str,
    local: &std::collections::BTreeMap<String, T>,
    remote: &std::collections::BTreeMap<String, T>,
) {
    let mut keys: Vec<&String> = local.keys().chain(remote.keys()).collect();
    keys.sort();
    keys.dedup();
    for key in keys {
        let l = local.get(key);
        let r = remote.get(key);
        if l != r {
            out.push(SettingChange {
                platform,
                key: format!("{kind}:{key}"),
                local: l.and_then(|v| serde_json::to_value(v).ok()),
                remote: r.and_then(|v| serde_json::to_value(v).ok()),
            });
        }
    }
}

// =============================================================================
// Wizard
// =============================================================================

/// The conflict wizard: both envelopes, the diff, the current step, and the
/// pending decision.
#[derive(Debug)]
pub struct ConflictWizard {
    pub local: SyncEnvelope,
    pub remote: SyncEnvelope,
    /// The server record's timestamp at conflict time.
    pub remote_timestamp: i64,
    step: WizardStep,
    diff: ConflictDiff,
    decision: Option<Resolution>,
}

impl ConflictWizard {
    pub fn new(local: SyncEnvelope, remote: SyncEnvelope, remote_timestamp: i64) -> Self {
        let diff = ConflictDiff::compute(&local, &remote);
        Self {
            local,
            remote,
            remote_timestamp,
            step: WizardStep::Summary,
            diff,
            decision: None,
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn diff(&self) -> &ConflictDiff {
        &self.diff
    }

    pub fn summary(&self) -> ConflictSummary {
        self.diff.summary()
    }

    /// Advance to the next step; saturates at Decision.
    pub fn next(&mut self) {
        let idx = self.step.index();
        if idx + 1 < WizardStep::ORDER.len() {
            self.step = WizardStep::ORDER[idx + 1];
        }
    }

    /// Go back one step; saturates at Summary. Selections survive.
    pub fn back(&mut self) {
        let idx = self.step.index();
        if idx > 0 {
            self.step = WizardStep::ORDER[idx - 1];
        }
    }

    /// Case-insensitive substring search over assignment changes (step 3).
    pub fn search_assignments(&self, query: &str) -> Vec<&AssignmentChange> {
        let needle = query.to_lowercase();
        self.diff
            .assignments
            .iter()
            .filter(|c| needle.is_empty() || c.code.to_lowercase().contains(&needle))
            .collect()
    }

    /// Record the user's choice (only meaningful on the Decision step, but
    /// preserved across navigation either way).
    pub fn choose(&mut self, decision: Resolution) {
        self.decision = Some(decision);
    }

    pub fn decision(&self) -> Option<Resolution> {
        self.decision
    }
}
