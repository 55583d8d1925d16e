// =============================================================================
// Window Returns — derivation from the raw time series
// =============================================================================
//
// The API's returns table is authoritative when present. For a missing
// window the return is reconstructed from the time series, adjusting the end
// amount by the net investment flow over the window so that contributions
// and redemptions do not masquerade as performance.
// =============================================================================

use chrono::{Datelike, Months, NaiveDate};

use super::series::{PerformanceSeries, SeriesPoint};

/// The derivable return windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnWindow {
    OneMonth,
    SixMonth,
    Ytd,
    OneYear,
    ThreeYear,
}

impl ReturnWindow {
    /// Window start for a series ending at `end`.
    pub fn start(&self, end: NaiveDate) -> NaiveDate {
        let months_back = |n: u32| end.checked_sub_months(Months::new(n)).unwrap_or(end);
        match self {
            Self::OneMonth => months_back(1),
            Self::SixMonth => months_back(6),
            Self::Ytd => NaiveDate::from_ymd_opt(end.year(), 1, 1).unwrap_or(end),
            Self::OneYear => months_back(12),
            Self::ThreeYear => months_back(36),
        }
    }

    /// The API-reported value for this window, if present and finite.
    fn reported(&self, series: &PerformanceSeries) -> Option<f64> {
        let table = &series.returns_table;
        let value = match self {
            Self::OneMonth => table.one_month,
            Self::SixMonth => table.six_month,
            Self::Ytd => table.ytd,
            Self::OneYear => table.one_year,
            Self::ThreeYear => table.three_year,
        };
        value.filter(|n| n.is_finite())
    }
}

/// Derive a window return from the raw series.
///
/// Start point: the latest amount-bearing observation dated on or before
/// `window_start`, or the earliest amount-bearing observation when none
/// qualifies. End point: the latest amount-bearing observation. The end
/// amount is adjusted by the change in cumulative net investment across the
/// window; a non-positive start amount yields `None`. Negative adjusted ends
/// are kept — they are losses, not errors.
pub fn derive_window_return(series: &[SeriesPoint], window_start: NaiveDate) -> Option<f64> {
    let observed: Vec<&SeriesPoint> = series.iter().filter(|p| p.amount.is_some()).collect();
    let end = *observed.last()?;

    let start = observed
        .iter()
        .rev()
        .find(|p| p.date <= window_start)
        .copied()
        .or_else(|| observed.first().copied())?;

    let start_amount = start.amount?;
    let end_amount = end.amount?;
    if !(start_amount.is_finite() && end_amount.is_finite()) || start_amount <= 0.0 {
        return None;
    }

    // Contributions and redemptions over the window. Missing cumulative
    // figures contribute no adjustment.
    let net_flow = match (
        start.cumulative_net_investment_amount,
        end.cumulative_net_investment_amount,
    ) {
        (Some(s), Some(e)) if s.is_finite() && e.is_finite() => e - s,
        _ => 0.0,
    };

    let adjusted_end = end_amount - net_flow;
    let pct = (adjusted_end - start_amount) / start_amount * 100.0;
    pct.is_finite().then_some(pct)
}

/// Window return for a goal: the API's value when reported, otherwise the
/// series-derived fallback anchored at the latest observation.
pub fn resolve_window_return(series: &PerformanceSeries, window: ReturnWindow) -> Option<f64> {
    if let Some(reported) = window.reported(series) {
        return Some(reported);
    }
    let end_date = series.latest_point()?.date;
    derive_window_return(&series.time_series, window.start(end_date))
}
