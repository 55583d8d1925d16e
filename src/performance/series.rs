// =============================================================================
// Performance Series — per-goal BFF payload shape
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// One observation of a goal's time series. `None` amounts are missing data,
/// never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub date: NaiveDate,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub cumulative_net_investment_amount: Option<f64>,
}

/// Time-weighted returns per window, in percent, as reported by the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnsTable {
    #[serde(default)]
    pub one_month: Option<f64>,
    #[serde(default)]
    pub six_month: Option<f64>,
    #[serde(default)]
    pub ytd: Option<f64>,
    #[serde(default)]
    pub one_year: Option<f64>,
    #[serde(default)]
    pub three_year: Option<f64>,
    #[serde(default)]
    pub all_time: Option<f64>,
}

/// Decoded per-goal performance payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSeries {
    pub goal_id: String,
    #[serde(default)]
    pub time_series: Vec<SeriesPoint>,
    #[serde(default)]
    pub returns_table: ReturnsTable,
    #[serde(default)]
    pub net_investment_amount: Option<f64>,
    #[serde(default)]
    pub ending_balance_amount: Option<f64>,
    #[serde(default)]
    pub total_balance_amount: Option<f64>,
    #[serde(default)]
    pub market_value_amount: Option<f64>,
    #[serde(default)]
    pub total_investment_value: Option<f64>,
    #[serde(default)]
    pub pending_processing_amount: Option<f64>,
    #[serde(default)]
    pub annualised_irr: Option<f64>,
    #[serde(default)]
    pub simple_return_percent: Option<f64>,
    #[serde(default)]
    pub total_return_percent: Option<f64>,
    #[serde(default)]
    pub gain_or_loss_amount: Option<f64>,
    #[serde(default)]
    pub fees_amount: Option<f64>,
    /// All-time net investment from the gain/loss table; the weight for TWR
    /// and IRR aggregation.
    #[serde(default)]
    pub all_time_net_investment: Option<f64>,
}

impl PerformanceSeries {
    /// Latest amount-bearing observation, if any.
    pub fn latest_point(&self) -> Option<&SeriesPoint> {
        self.time_series.iter().rev().find(|p| p.amount.is_some())
    }

    /// Ending balance with the documented precedence chain:
    /// `totalInvestmentValue + pendingProcessing` → `endingBalanceAmount` →
    /// `totalBalanceAmount` → `marketValueAmount` → latest series amount.
    pub fn ending_balance(&self) -> Option<f64> {
        if let (Some(value), Some(pending)) =
            (self.total_investment_value, self.pending_processing_amount)
        {
            if value.is_finite() && pending.is_finite() {
                return Some(value + pending);
            }
        }
        self.ending_balance_amount
            .filter(|n| n.is_finite())
            .or(self.total_balance_amount.filter(|n| n.is_finite()))
            .or(self.market_value_amount.filter(|n| n.is_finite()))
            .or_else(|| self.latest_point().and_then(|p| p.amount))
    }
}

// =============================================================================
// BFF decoding
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BffGainOrLossEntry {
    #[serde(default)]
    all_time_value: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BffGainOrLossTable {
    #[serde(default)]
    net_investment: Option<BffGainOrLossEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BffPayload {
    #[serde(default)]
    time_series: Vec<SeriesPoint>,
    #[serde(default)]
    returns_table: ReturnsTable,
    #[serde(default)]
    net_investment_amount: Option<f64>,
    #[serde(default)]
    ending_balance_amount: Option<f64>,
    #[serde(default)]
    total_balance_amount: Option<f64>,
    #[serde(default)]
    market_value_amount: Option<f64>,
    #[serde(default)]
    total_investment_value: Option<f64>,
    #[serde(default)]
    pending_processing_amount: Option<f64>,
    #[serde(default)]
    annualised_irr: Option<f64>,
    #[serde(default)]
    simple_return_percent: Option<f64>,
    #[serde(default)]
    total_return_percent: Option<f64>,
    #[serde(default)]
    gain_or_loss_amount: Option<f64>,
    #[serde(default)]
    fees_amount: Option<f64>,
    #[serde(default)]
    gain_or_loss_table: BffGainOrLossTable,
}

/// Decode a raw BFF payload for `goal_id`. `None` on shape mismatch.
pub fn decode_bff_performance(goal_id: &str, payload: &Value) -> Option<PerformanceSeries> {
    let parsed: BffPayload = match serde_json::from_value(payload.clone()) {
        Ok(p) => p,
        Err(e) => {
            debug!(goal_id, error = %e, "BFF payload rejected by decoder");
            return None;
        }
    };

    Some(PerformanceSeries {
        goal_id: goal_id.to_string(),
        time_series: parsed.time_series,
        returns_table: parsed.returns_table,
        net_investment_amount: parsed.net_investment_amount,
        ending_balance_amount: parsed.ending_balance_amount,
        total_balance_amount: parsed.total_balance_amount,
        market_value_amount: parsed.market_value_amount,
        total_investment_value: parsed.total_investment_value,
        pending_processing_amount: parsed.pending_processing_amount,
        annualised_irr: parsed.annualised_irr,
        simple_return_percent: parsed.simple_return_percent,
        total_return_percent: parsed.total_return_percent,
        gain_or_loss_amount: parsed.gain_or_loss_amount,
        fees_amount: parsed.fees_amount,
        all_time_net_investment: parsed
            .gain_or_loss_table
            .net_investment
            .and_then(|e| e.all_time_value),
    })
}
