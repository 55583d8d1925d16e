// =============================================================================
// BucketMap — bucket × goal-type × goal model
// =============================================================================
//
// Merges the three Platform-A streams by goal identity into a stable tree:
//
//   BucketMap ─ BucketName → Bucket
//   Bucket    ─ GoalType   → GoalGroup  (+ ending-balance total)
//   GoalGroup ─ ordered goals (+ group sums)
//
// Per-goal nullness is preserved; nulls coerce to 0 only inside group and
// bucket aggregates. BTreeMap keys and a per-group name sort make the output
// deterministic regardless of input order.
// =============================================================================

use std::collections::BTreeMap;

use serde::Serialize;

use super::decode::{InvestibleRecord, PerformanceRecord, SummaryRecord};

/// Bucket used when a goal name is blank.
pub const UNCATEGORIZED: &str = "Uncategorized";
/// Literal separator splitting a goal name into bucket and description.
const BUCKET_SEPARATOR: &str = " - ";

// =============================================================================
// Goal type
// =============================================================================

/// Normalised investment category. Blank or absent raw values collapse to
/// [`GoalType::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum GoalType {
    Investment,
    Cash,
    Srs,
    Other(String),
    Unknown,
}

impl GoalType {
    /// Normalise a raw category string from the platform.
    pub fn normalize(raw: Option<&str>) -> Self {
        let trimmed = raw.map(str::trim).unwrap_or("");
        match trimmed.to_ascii_uppercase().as_str() {
            "" => Self::Unknown,
            "INVESTMENT" => Self::Investment,
            "CASH" => Self::Cash,
            "SRS" => Self::Srs,
            _ => Self::Other(trimmed.to_string()),
        }
    }

    /// Display label for the overlay.
    pub fn label(&self) -> &str {
        match self {
            Self::Investment => "Investment",
            Self::Cash => "Cash",
            Self::Srs => "SRS",
            Self::Other(raw) => raw,
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for GoalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// =============================================================================
// Tree types
// =============================================================================

/// A single Platform-A goal as it appears in the model.
#[derive(Debug, Clone, Serialize)]
pub struct Goal {
    pub goal_id: String,
    pub goal_name: String,
    pub goal_bucket: String,
    pub goal_type: GoalType,
    pub ending_balance_amount: Option<f64>,
    pub total_cumulative_return: Option<f64>,
    pub simple_rate_of_return_percent: Option<f64>,
}

/// Goals of one type within a bucket, with group aggregates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GoalGroup {
    pub goals: Vec<Goal>,
    pub ending_balance_amount: f64,
    pub total_cumulative_return: f64,
}

/// One bucket: its goal-type groups plus the bucket's ending-balance total.
/// Not serialised directly — the view models are the rendering surface.
#[derive(Debug, Clone, Default)]
pub struct Bucket {
    pub groups: BTreeMap<GoalType, GoalGroup>,
    pub ending_balance_total: f64,
}

/// The full bucket tree.
#[derive(Debug, Clone, Default)]
pub struct BucketMap {
    pub buckets: BTreeMap<String, Bucket>,
}

impl BucketMap {
    /// Sum of all bucket ending-balance totals.
    pub fn ending_balance_grand_total(&self) -> f64 {
        self.buckets.values().map(|b| b.ending_balance_total).sum()
    }

    /// Iterate every goal in the tree.
    pub fn goals(&self) -> impl Iterator<Item = &Goal> {
        self.buckets
            .values()
            .flat_map(|b| b.groups.values())
            .flat_map(|g| g.goals.iter())
    }
}

// =============================================================================
// Name splitting
// =============================================================================

/// Split a goal name on the first `" - "` into (bucket, description).
///
/// Without a separator the trimmed name is the bucket; a blank name (or a
/// blank before-part) falls back to [`UNCATEGORIZED`].
pub fn split_goal_name(name: &str) -> (String, Option<String>) {
    match name.find(BUCKET_SEPARATOR) {
        Some(idx) => {
            let bucket = name[..idx].trim();
            let description = name[idx + BUCKET_SEPARATOR.len()..].to_string();
            let bucket = if bucket.is_empty() {
                UNCATEGORIZED.to_string()
            } else {
                bucket.to_string()
            };
            (bucket, Some(description))
        }
        None => {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                (UNCATEGORIZED.to_string(), None)
            } else {
                (trimmed.to_string(), None)
            }
        }
    }
}

// =============================================================================
// Growth %
// =============================================================================

/// Growth percentage of a goal. Ending balance is a post-return value, so
/// the invested principal is `ending_balance - cumulative_return`. Division
/// by zero, non-finite inputs, and negative principal all yield 0.
pub fn growth_percent(ending_balance: f64, cumulative_return: f64) -> f64 {
    if !ending_balance.is_finite() || !cumulative_return.is_finite() {
        return 0.0;
    }
    let principal = ending_balance - cumulative_return;
    if principal <= 0.0 {
        return 0.0;
    }
    let pct = cumulative_return / principal * 100.0;
    if pct.is_finite() {
        pct
    } else {
        0.0
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Build the bucket tree from the three Platform-A payloads.
///
/// Returns `None` when any input is missing — a half-built view is worse
/// than no view. Goal names come from the first non-empty of investible and
/// summary; ending balance prefers `totalInvestmentValue +
/// pendingProcessingAmount` and falls back to the investible amount.
pub fn build_bucket_map(
    performance: Option<&[PerformanceRecord]>,
    investible: Option<&[InvestibleRecord]>,
    summaries: Option<&[SummaryRecord]>,
) -> Option<BucketMap> {
    let performance = performance?;
    let investible = investible?;
    let summaries = summaries?;

    let investible_by_id: BTreeMap<&str, &InvestibleRecord> =
        investible.iter().map(|r| (r.goal_id.as_str(), r)).collect();
    let summary_by_id: BTreeMap<&str, &SummaryRecord> =
        summaries.iter().map(|r| (r.goal_id.as_str(), r)).collect();

    let mut map = BucketMap::default();

    for perf in performance {
        let inv = investible_by_id.get(perf.goal_id.as_str());
        let sum = summary_by_id.get(perf.goal_id.as_str());

        let goal_name = first_non_empty(&[
            inv.and_then(|r| r.goal_name.as_deref()),
            sum.and_then(|r| r.goal_name.as_deref()),
        ]);
        let goal_type = GoalType::normalize(first_non_empty(&[
            inv.and_then(|r| r.investment_goal_type.as_deref()),
            sum.and_then(|r| r.investment_goal_type.as_deref()),
        ]));

        let (goal_bucket, _) = split_goal_name(goal_name.unwrap_or(""));

        let ending_balance = resolve_ending_balance(
            perf.total_investment_value,
            perf.pending_processing_amount,
            inv.and_then(|r| r.total_investment_amount),
        );
        let cumulative_return = perf.total_cumulative_return.filter(|n| n.is_finite());

        let goal = Goal {
            goal_id: perf.goal_id.clone(),
            goal_name: goal_name.unwrap_or("").to_string(),
            goal_bucket: goal_bucket.clone(),
            goal_type: goal_type.clone(),
            ending_balance_amount: ending_balance,
            total_cumulative_return: cumulative_return,
            simple_rate_of_return_percent: perf
                .simple_rate_of_return_percent
                .filter(|n| n.is_finite()),
        };

        let bucket = map.buckets.entry(goal_bucket).or_default();
        let group = bucket.groups.entry(goal_type).or_default();
        // Nulls coerce to 0 only in the aggregates; the goal keeps its nulls.
        group.ending_balance_amount += ending_balance.unwrap_or(0.0);
        group.total_cumulative_return += cumulative_return.unwrap_or(0.0);
        bucket.ending_balance_total += ending_balance.unwrap_or(0.0);
        group.goals.push(goal);
    }

    for bucket in map.buckets.values_mut() {
        for group in bucket.groups.values_mut() {
            group.goals.sort_by(|a, b| a.goal_name.cmp(&b.goal_name));
        }
    }

    Some(map)
}

/// Prefer `totalInvestmentValue + pendingProcessingAmount` when both are
/// finite; otherwise fall back to the investible endpoint's (misnamed)
/// ending balance.
fn resolve_ending_balance(
    total_investment_value: Option<f64>,
    pending_processing_amount: Option<f64>,
    investible_amount: Option<f64>,
) -> Option<f64> {
    match (total_investment_value, pending_processing_amount) {
        (Some(value), Some(pending)) if value.is_finite() && pending.is_finite() => {
            Some(value + pending)
        }
        _ => investible_amount.filter(|n| n.is_finite()),
    }
}

fn first_non_empty<'a>(candidates: &[Option<&'a str>]) -> Option<&'a str> {
    candidates
        .iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn perf(goal_id: &str, value: f64, pending: f64, cum: f64) -> PerformanceRecord {
        serde_json::from_value(json!({
            "goalId": goal_id,
            "totalInvestmentValue": value,
            "pendingProcessingAmount": pending,
            "totalCumulativeReturn": cum,
        }))
        .unwrap()
    }

    fn inv(goal_id: &str, name: &str, goal_type: &str, amount: f64) -> InvestibleRecord {
        serde_json::from_value(json!({
            "goalId": goal_id,
            "goalName": name,
            "investmentGoalType": goal_type,
            "totalInvestmentAmount": amount,
        }))
        .unwrap()
    }

    fn summary(goal_id: &str, name: &str, goal_type: &str) -> SummaryRecord {
        serde_json::from_value(json!({
            "goalId": goal_id,
            "goalName": name,
            "investmentGoalType": goal_type,
        }))
        .unwrap()
    }

    // ---- split_goal_name ---------------------------------------------------

    #[test]
    fn split_on_first_separator_only() {
        let (bucket, desc) = split_goal_name("Retirement - Core - Satellite");
        assert_eq!(bucket, "Retirement");
        assert_eq!(desc.as_deref(), Some("Core - Satellite"));
    }

    #[test]
    fn split_without_separator_uses_trimmed_name() {
        let (bucket, desc) = split_goal_name("  Emergency Fund  ");
        assert_eq!(bucket, "Emergency Fund");
        assert!(desc.is_none());
    }

    #[test]
    fn blank_name_is_uncategorized() {
        assert_eq!(split_goal_name("  ").0, UNCATEGORIZED);
        assert_eq!(split_goal_name("").0, UNCATEGORIZED);
    }

    // ---- growth_percent ----------------------------------------------------

    #[test]
    fn growth_percent_known_value() {
        // 10_000 return on 100_000 principal => exactly 10%.
        assert!((growth_percent(110_000.0, 10_000.0) - 10.0).abs() < 1e-10);
    }

    #[test]
    fn growth_percent_zero_balance_is_zero() {
        assert_eq!(growth_percent(0.0, 0.0), 0.0);
    }

    #[test]
    fn growth_percent_negative_principal_is_zero() {
        assert_eq!(growth_percent(100.0, 200.0), 0.0);
    }

    #[test]
    fn growth_percent_non_finite_is_zero() {
        assert_eq!(growth_percent(f64::NAN, 10.0), 0.0);
        assert_eq!(growth_percent(f64::INFINITY, 10.0), 0.0);
    }

    // ---- build_bucket_map --------------------------------------------------

    #[test]
    fn missing_input_yields_none() {
        assert!(build_bucket_map(None, Some(&[]), Some(&[])).is_none());
        assert!(build_bucket_map(Some(&[]), None, Some(&[])).is_none());
        assert!(build_bucket_map(Some(&[]), Some(&[]), None).is_none());
    }

    #[test]
    fn bucket_extraction_matches_name_rules() {
        let performance = vec![
            perf("g1", 100.0, 0.0, 10.0),
            perf("g2", 200.0, 0.0, 20.0),
            perf("g3", 300.0, 0.0, 30.0),
            perf("g4", 400.0, 0.0, 40.0),
        ];
        let investible = vec![
            inv("g1", "Retirement - Core", "INVESTMENT", 100.0),
            inv("g2", "Retirement - Satellite", "INVESTMENT", 200.0),
            inv("g3", "Emergency Fund", "CASH", 300.0),
            inv("g4", "  ", "CASH", 400.0),
        ];
        let summaries = vec![
            summary("g1", "Retirement - Core", "INVESTMENT"),
            summary("g2", "Retirement - Satellite", "INVESTMENT"),
            summary("g3", "Emergency Fund", "CASH"),
            summary("g4", "  ", "CASH"),
        ];

        let map = build_bucket_map(Some(&performance), Some(&investible), Some(&summaries))
            .unwrap();

        let names: Vec<&String> = map.buckets.keys().collect();
        assert_eq!(names, vec!["Emergency Fund", "Retirement", UNCATEGORIZED]);

        let retirement = &map.buckets["Retirement"];
        let goals: usize = retirement.groups.values().map(|g| g.goals.len()).sum();
        assert_eq!(goals, 2);
    }

    #[test]
    fn group_sums_treat_null_as_zero_but_preserve_goal_nullness() {
        let performance: Vec<PerformanceRecord> = vec![
            perf("g1", 100.0, 0.0, 10.0),
            serde_json::from_value(json!({ "goalId": "g2" })).unwrap(),
        ];
        let investible = vec![
            inv("g1", "Growth - A", "INVESTMENT", 100.0),
            // g2 has no balances anywhere.
            serde_json::from_value::<InvestibleRecord>(
                json!({ "goalId": "g2", "goalName": "Growth - B", "investmentGoalType": "INVESTMENT" }),
            )
            .unwrap(),
        ];
        let summaries = vec![
            summary("g1", "Growth - A", "INVESTMENT"),
            summary("g2", "Growth - B", "INVESTMENT"),
        ];

        let map = build_bucket_map(Some(&performance), Some(&investible), Some(&summaries))
            .unwrap();
        let group = &map.buckets["Growth"].groups[&GoalType::Investment];

        assert_eq!(group.goals.len(), 2);
        assert!((group.ending_balance_amount - 100.0).abs() < 1e-10);
        assert!(group.goals.iter().any(|g| g.ending_balance_amount.is_none()));
    }

    #[test]
    fn ending_balance_falls_back_to_investible_amount() {
        let performance: Vec<PerformanceRecord> =
            vec![serde_json::from_value(json!({ "goalId": "g1", "totalCumulativeReturn": 5.0 }))
                .unwrap()];
        let investible = vec![inv("g1", "Travel - Japan", "INVESTMENT", 750.0)];
        let summaries = vec![summary("g1", "Travel - Japan", "INVESTMENT")];

        let map = build_bucket_map(Some(&performance), Some(&investible), Some(&summaries))
            .unwrap();
        let goal = map.goals().next().unwrap();
        assert_eq!(goal.ending_balance_amount, Some(750.0));
    }

    #[test]
    fn totals_are_consistent_bottom_up() {
        let performance = vec![
            perf("g1", 100.0, 10.0, 1.0),
            perf("g2", 200.0, 20.0, 2.0),
            perf("g3", 300.0, 30.0, 3.0),
        ];
        let investible = vec![
            inv("g1", "A - x", "INVESTMENT", 0.0),
            inv("g2", "A - y", "CASH", 0.0),
            inv("g3", "B - z", "INVESTMENT", 0.0),
        ];
        let summaries = vec![
            summary("g1", "A - x", "INVESTMENT"),
            summary("g2", "A - y", "CASH"),
            summary("g3", "B - z", "INVESTMENT"),
        ];

        let map = build_bucket_map(Some(&performance), Some(&investible), Some(&summaries))
            .unwrap();

        for bucket in map.buckets.values() {
            let group_sum: f64 = bucket.groups.values().map(|g| g.ending_balance_amount).sum();
            assert!((bucket.ending_balance_total - group_sum).abs() < 1e-10);
        }
        let goal_sum: f64 = map.goals().filter_map(|g| g.ending_balance_amount).sum();
        assert!((map.ending_balance_grand_total() - goal_sum).abs() < 1e-10);
    }

    #[test]
    fn deterministic_regardless_of_input_order() {
        let mut performance = vec![
            perf("g1", 100.0, 0.0, 1.0),
            perf("g2", 200.0, 0.0, 2.0),
        ];
        let investible = vec![
            inv("g1", "A - x", "INVESTMENT", 0.0),
            inv("g2", "A - w", "INVESTMENT", 0.0),
        ];
        let summaries = vec![
            summary("g1", "A - x", "INVESTMENT"),
            summary("g2", "A - w", "INVESTMENT"),
        ];

        let forward =
            build_bucket_map(Some(&performance), Some(&investible), Some(&summaries)).unwrap();
        performance.reverse();
        let reversed =
            build_bucket_map(Some(&performance), Some(&investible), Some(&summaries)).unwrap();

        let fwd_names: Vec<&String> = forward.buckets["A"].groups[&GoalType::Investment]
            .goals
            .iter()
            .map(|g| &g.goal_name)
            .collect();
        let rev_names: Vec<&String> = reversed.buckets["A"].groups[&GoalType::Investment]
            .goals
            .iter()
            .map(|g| &g.goal_name)
            .collect();
        assert_eq!(fwd_names, rev_names);
        assert_eq!(fwd_names, vec!["A - w", "A - x"]);
    }

    #[test]
    fn goal_type_normalization() {
        assert_eq!(GoalType::normalize(Some("investment")), GoalType::Investment);
        assert_eq!(GoalType::normalize(Some(" CASH ")), GoalType::Cash);
        assert_eq!(GoalType::normalize(Some("")), GoalType::Unknown);
        assert_eq!(GoalType::normalize(None), GoalType::Unknown);
        assert_eq!(GoalType::Unknown.label(), "Unknown");
        assert_eq!(
            GoalType::normalize(Some("CPF")),
            GoalType::Other("CPF".to_string())
        );
    }
}
