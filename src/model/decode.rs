// =============================================================================
// Endpoint Decoders — tagged payload shapes with defensive parsing
// =============================================================================
//
// Each observed endpoint has its own record shape and decoder. Decoders
// reject by returning `None` on an unexpected shape; nothing throws across
// the observation boundary. Numeric fields deserialise only from JSON
// numbers — strings, booleans, and empty values never coerce.
// =============================================================================

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Row filtered out of Platform-B holdings (a grouping header, not a holding).
const DPMS_HEADER: &str = "DPMS_HEADER";

// =============================================================================
// Platform A
// =============================================================================

/// One entry of the goals performance payload (`/v1/goals/performance`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRecord {
    pub goal_id: String,
    #[serde(default)]
    pub total_investment_value: Option<f64>,
    #[serde(default)]
    pub pending_processing_amount: Option<f64>,
    #[serde(default)]
    pub total_cumulative_return: Option<f64>,
    #[serde(default)]
    pub total_cumulative_return_percent: Option<f64>,
    #[serde(default)]
    pub simple_rate_of_return_percent: Option<f64>,
    #[serde(default)]
    pub time_weighted_return_percent: Option<f64>,
}

/// One entry of the investible goals payload (`/v2/goals/investible`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestibleRecord {
    pub goal_id: String,
    #[serde(default)]
    pub goal_name: Option<String>,
    #[serde(default)]
    pub investment_goal_type: Option<String>,
    /// Misnamed upstream: this is the goal's ending balance, not the amount
    /// invested. Read it only through the ending-balance fallback path.
    #[serde(default)]
    pub total_investment_amount: Option<f64>,
}

/// One entry of the goal summaries payload (`/v1/goals`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRecord {
    pub goal_id: String,
    #[serde(default)]
    pub goal_name: Option<String>,
    #[serde(default)]
    pub investment_goal_type: Option<String>,
}

/// Decode the performance array. `None` on any shape mismatch.
pub fn decode_performance(payload: &Value) -> Option<Vec<PerformanceRecord>> {
    decode_array(payload, "performance")
}

/// Decode the investible array. `None` on any shape mismatch.
pub fn decode_investible(payload: &Value) -> Option<Vec<InvestibleRecord>> {
    decode_array(payload, "investible")
}

/// Decode the goal summaries array. `None` on any shape mismatch.
pub fn decode_summaries(payload: &Value) -> Option<Vec<SummaryRecord>> {
    decode_array(payload, "summaries")
}

fn decode_array<T: serde::de::DeserializeOwned>(payload: &Value, endpoint: &str) -> Option<Vec<T>> {
    match serde_json::from_value::<Vec<T>>(payload.clone()) {
        Ok(records) => Some(records),
        Err(e) => {
            debug!(endpoint, error = %e, "payload rejected by decoder");
            None
        }
    }
}

// =============================================================================
// Platform B
// =============================================================================

/// One holding row from the find-holdings-with-pnl payload. All monetary
/// math uses the `*Lcy` (SGD) fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingRow {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub current_value_lcy: Option<f64>,
    #[serde(default)]
    pub current_units: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HoldingsAccount {
    #[serde(default)]
    holdings: Vec<HoldingRow>,
}

#[derive(Debug, Deserialize)]
struct HoldingsPayload {
    data: Vec<HoldingsAccount>,
}

/// Decode and flatten the holdings payload across accounts, dropping
/// `DPMS_HEADER` grouping rows. `None` on any shape mismatch.
pub fn decode_holdings(payload: &Value) -> Option<Vec<HoldingRow>> {
    let parsed: HoldingsPayload = match serde_json::from_value(payload.clone()) {
        Ok(p) => p,
        Err(e) => {
            debug!(endpoint = "holdings", error = %e, "payload rejected by decoder");
            return None;
        }
    };

    let rows = parsed
        .data
        .into_iter()
        .flat_map(|account| account.holdings)
        .filter(|row| row.product_type.as_deref() != Some(DPMS_HEADER))
        .collect();
    Some(rows)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn performance_decodes_and_tolerates_missing_fields() {
        let payload = json!([
            {
                "goalId": "g1",
                "totalInvestmentValue": 1000.0,
                "pendingProcessingAmount": 50.0,
                "totalCumulativeReturn": 100.0
            },
            { "goalId": "g2" }
        ]);
        let records = decode_performance(&payload).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].total_investment_value, Some(1000.0));
        assert!(records[1].total_investment_value.is_none());
    }

    #[test]
    fn performance_rejects_non_array() {
        assert!(decode_performance(&json!({"goalId": "g1"})).is_none());
    }

    #[test]
    fn numeric_fields_do_not_coerce_from_strings() {
        let payload = json!([{ "goalId": "g1", "totalInvestmentValue": "1000" }]);
        assert!(decode_performance(&payload).is_none());
    }

    #[test]
    fn holdings_flattens_accounts_and_filters_headers() {
        let payload = json!({
            "data": [
                {
                    "refno": "A1",
                    "holdings": [
                        { "code": "F100", "productType": "FUND", "currentValueLcy": 5000.0 },
                        { "code": "HDR", "productType": "DPMS_HEADER", "currentValueLcy": 0.0 }
                    ]
                },
                {
                    "refno": "A2",
                    "holdings": [
                        { "code": "F200", "productType": "FUND", "currentValueLcy": 2500.0 }
                    ]
                }
            ]
        });
        let rows = decode_holdings(&payload).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.code != "HDR"));
    }

    #[test]
    fn holdings_rejects_missing_data_field() {
        assert!(decode_holdings(&json!({ "rows": [] })).is_none());
    }
}
