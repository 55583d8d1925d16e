// =============================================================================
// Cross-Goal Aggregation — weighted means over per-goal metrics
// =============================================================================
//
// Percentages combine as weighted means with metric-specific weights:
// total/simple return by net investment, TWR windows and annualised IRR by
// all-time net investment. A goal without a value for a window contributes
// no weight to that window. Absolute amounts are summed.
// =============================================================================

use serde::Serialize;

use super::series::{PerformanceSeries, ReturnsTable};
use super::windows::{resolve_window_return, ReturnWindow};

/// Aggregated metrics across a set of goals.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateMetrics {
    /// Weighted TWR per window.
    pub returns: ReturnsTable,
    pub total_return_percent: Option<f64>,
    pub simple_return_percent: Option<f64>,
    pub annualised_irr: Option<f64>,
    pub net_investment_total: f64,
    pub gain_or_loss_total: f64,
    pub fees_total: f64,
    pub ending_balance_total: f64,
}

/// Weighted mean over `(value, weight)` pairs. Pairs with non-finite parts
/// or non-positive weight are dropped; `None` when nothing remains.
pub fn weighted_mean(pairs: &[(f64, f64)]) -> Option<f64> {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for &(value, weight) in pairs {
        if !value.is_finite() || !weight.is_finite() || weight <= 0.0 {
            continue;
        }
        weighted_sum += value * weight;
        weight_total += weight;
    }
    if weight_total > 0.0 {
        Some(weighted_sum / weight_total)
    } else {
        None
    }
}

/// Aggregate a set of per-goal series.
pub fn aggregate(series: &[PerformanceSeries]) -> AggregateMetrics {
    let by_net_investment = |value: Option<f64>, s: &PerformanceSeries| {
        Some((value?, s.net_investment_amount?))
    };
    let by_all_time = |value: Option<f64>, s: &PerformanceSeries| {
        Some((value?, s.all_time_net_investment?))
    };

    let window_mean = |window: ReturnWindow| {
        let pairs: Vec<(f64, f64)> = series
            .iter()
            .filter_map(|s| by_all_time(resolve_window_return(s, window), s))
            .collect();
        weighted_mean(&pairs)
    };

    let collect_mean = |pick: &dyn Fn(&PerformanceSeries) -> Option<(f64, f64)>| {
        let pairs: Vec<(f64, f64)> = series.iter().filter_map(pick).collect();
        weighted_mean(&pairs)
    };

    let sum_of = |pick: &dyn Fn(&PerformanceSeries) -> Option<f64>| {
        series
            .iter()
            .filter_map(pick)
            .filter(|n| n.is_finite())
            .sum()
    };

    AggregateMetrics {
        returns: ReturnsTable {
            one_month: window_mean(ReturnWindow::OneMonth),
            six_month: window_mean(ReturnWindow::SixMonth),
            ytd: window_mean(ReturnWindow::Ytd),
            one_year: window_mean(ReturnWindow::OneYear),
            three_year: window_mean(ReturnWindow::ThreeYear),
            all_time: None,
        },
        total_return_percent: collect_mean(&|s| by_net_investment(s.total_return_percent, s)),
        simple_return_percent: collect_mean(&|s| by_net_investment(s.simple_return_percent, s)),
        annualised_irr: collect_mean(&|s| by_all_time(s.annualised_irr, s)),
        net_investment_total: sum_of(&|s| s.net_investment_amount),
        gain_or_loss_total: sum_of(&|s| s.gain_or_loss_amount),
        fees_total: sum_of(&|s| s.fees_amount),
        ending_balance_total: sum_of(&|s| s.ending_balance()),
    }
}
