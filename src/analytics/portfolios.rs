// =============================================================================
// Platform-B Portfolios — catalog, tags, assignments, trade suggestions
// =============================================================================
//
// Portfolios are user-defined groupings of Platform-B instruments. Ids are
// slugs derived from names (collision suffix `-2`, `-3`, …). A missing
// assignment is equivalent to the reserved `"unassigned"` id; archiving a
// portfolio reassigns its codes to `"unassigned"` atomically with the
// archive flag.
// =============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use super::targets::FSM_TARGET_PREFIX;
use crate::model::HoldingRow;
use crate::store::ConfigStore;

/// Reserved id for instruments without an explicit assignment.
pub const UNASSIGNED: &str = "unassigned";
/// Maximum portfolio name length.
pub const MAX_PORTFOLIO_NAME_LEN: usize = 64;

const PORTFOLIOS_KEY: &str = "fsm_portfolios";
const TAG_CATALOG_KEY: &str = "fsm_tag_catalog";
const DRIFT_SETTINGS_KEY: &str = "fsm_drift_settings";
const ASSIGNMENT_PREFIX: &str = "fsm_assignment_";
const TAG_PREFIX: &str = "fsm_tag_";

/// One user-defined portfolio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub archived: bool,
}

/// Drift alert thresholds for the Platform-B view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftSettings {
    pub warning_pct: f64,
    pub critical_pct: f64,
}

impl Default for DriftSettings {
    fn default() -> Self {
        Self {
            warning_pct: 5.0,
            critical_pct: 10.0,
        }
    }
}

/// Catalog mutation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortfolioError {
    #[error("portfolio name is empty")]
    EmptyName,
    #[error("portfolio name exceeds {MAX_PORTFOLIO_NAME_LEN} characters")]
    NameTooLong,
    #[error("portfolio not found: {0}")]
    NotFound(String),
}

// =============================================================================
// Slugs
// =============================================================================

/// Lower-case, hyphen-separated slug of a portfolio name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_hyphen = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "portfolio".to_string()
    } else {
        slug
    }
}

/// Slug for `name` that collides with no existing portfolio id, using the
/// `-2`, `-3`, … suffix scheme.
pub fn unique_slug(name: &str, existing: &[Portfolio]) -> String {
    let base = slugify(name);
    let taken = |candidate: &str| existing.iter().any(|p| p.id == candidate);
    if !taken(&base) {
        return base;
    }
    let mut n = 2u32;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Store-backed portfolio, tag, and assignment catalog.
#[derive(Clone)]
pub struct PortfolioCatalog {
    store: Arc<ConfigStore>,
}

impl PortfolioCatalog {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self { store }
    }

    // ---- Portfolios --------------------------------------------------------

    pub fn portfolios(&self) -> Vec<Portfolio> {
        self.store
            .get(PORTFOLIOS_KEY)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    fn persist(&self, list: &[Portfolio]) {
        if let Ok(value) = serde_json::to_value(list) {
            self.store.set(PORTFOLIOS_KEY, value);
        }
    }

    /// Create a portfolio with a collision-free slug id.
    pub fn create(&self, name: &str) -> Result<Portfolio, PortfolioError> {
        let name = validate_name(name)?;
        let existing = self.portfolios();
        let portfolio = Portfolio {
            id: unique_slug(&name, &existing),
            name,
            archived: false,
        };

        let mut list = existing;
        list.push(portfolio.clone());
        self.persist(&list);
        info!(id = %portfolio.id, "portfolio created");
        Ok(portfolio)
    }

    /// Rename a portfolio. The id (slug) is stable across renames.
    pub fn rename(&self, id: &str, new_name: &str) -> Result<(), PortfolioError> {
        let new_name = validate_name(new_name)?;
        let mut list = self.portfolios();
        let entry = list
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| PortfolioError::NotFound(id.to_string()))?;
        entry.name = new_name;
        self.persist(&list);
        Ok(())
    }

    /// Archive a portfolio and reassign every code it held to
    /// [`UNASSIGNED`], in a single store transaction.
    pub fn archive(&self, id: &str) -> Result<(), PortfolioError> {
        let mut list = self.portfolios();
        let entry = list
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| PortfolioError::NotFound(id.to_string()))?;
        entry.archived = true;

        let mut updates: Vec<(String, Option<serde_json::Value>)> = Vec::new();
        for key in self.store.keys() {
            if let Some(code) = key.strip_prefix(ASSIGNMENT_PREFIX) {
                if self.store.get_str(&key).as_deref() == Some(id) {
                    // Missing assignment reads as "unassigned".
                    updates.push((format!("{ASSIGNMENT_PREFIX}{code}"), None));
                }
            }
        }
        if let Ok(value) = serde_json::to_value(&list) {
            updates.push((PORTFOLIOS_KEY.to_string(), Some(value)));
        }
        self.store.update_many(updates);
        info!(id, "portfolio archived, holdings reassigned");
        Ok(())
    }

    // ---- Assignments -------------------------------------------------------

    /// The portfolio id for `code`; a missing key reads as [`UNASSIGNED`].
    pub fn assignment(&self, code: &str) -> String {
        self.store
            .get_str(&format!("{ASSIGNMENT_PREFIX}{code}"))
            .unwrap_or_else(|| UNASSIGNED.to_string())
    }

    /// Assign `code` to a portfolio. Assigning to [`UNASSIGNED`] removes the
    /// key.
    pub fn assign(&self, code: &str, portfolio_id: &str) {
        let key = format!("{ASSIGNMENT_PREFIX}{code}");
        if portfolio_id == UNASSIGNED {
            self.store.remove(&key);
        } else {
            self.store.set(&key, json!(portfolio_id));
        }
    }

    // ---- Tags --------------------------------------------------------------

    pub fn tag(&self, code: &str) -> Option<String> {
        self.store.get_str(&format!("{TAG_PREFIX}{code}"))
    }

    pub fn set_tag(&self, code: &str, tag: Option<&str>) {
        let key = format!("{TAG_PREFIX}{code}");
        match tag.map(str::trim).filter(|t| !t.is_empty()) {
            Some(tag) => {
                self.store.set(&key, json!(tag));
                self.add_to_tag_catalog(tag);
            }
            None => self.store.remove(&key),
        }
    }

    pub fn tag_catalog(&self) -> Vec<String> {
        self.store
            .get(TAG_CATALOG_KEY)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    fn add_to_tag_catalog(&self, tag: &str) {
        let mut catalog = self.tag_catalog();
        if !catalog.iter().any(|t| t == tag) {
            catalog.push(tag.to_string());
            if let Ok(value) = serde_json::to_value(&catalog) {
                self.store.set(TAG_CATALOG_KEY, value);
            }
        }
    }

    // ---- Drift settings ----------------------------------------------------

    pub fn drift_settings(&self) -> DriftSettings {
        self.store
            .get(DRIFT_SETTINGS_KEY)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    pub fn set_drift_settings(&self, settings: DriftSettings) {
        if let Ok(value) = serde_json::to_value(settings) {
            self.store.set(DRIFT_SETTINGS_KEY, value);
        }
    }

    // ---- Targets (read side for suggestions) -------------------------------

    fn instrument_target(&self, code: &str) -> Option<f64> {
        self.store.get_f64(&format!("{FSM_TARGET_PREFIX}{code}"))
    }
}

fn validate_name(name: &str) -> Result<String, PortfolioError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(PortfolioError::EmptyName);
    }
    if trimmed.chars().count() > MAX_PORTFOLIO_NAME_LEN {
        return Err(PortfolioError::NameTooLong);
    }
    Ok(trimmed.to_string())
}

// =============================================================================
// Trade suggestions
// =============================================================================

/// Scope of a Platform-B trade-suggestion view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortfolioScope {
    All,
    Portfolio(String),
    Unassigned,
}

/// One buy/sell suggestion. Positive trade amounts are buys.
#[derive(Debug, Clone, Serialize)]
pub struct TradeSuggestion {
    pub code: String,
    pub name: Option<String>,
    pub current_value: f64,
    pub target_value: f64,
    pub trade_amount: f64,
}

/// Suggestions for every targeted instrument in scope, against the scope's
/// total value.
pub fn trade_suggestions(
    scope: &PortfolioScope,
    holdings: &[HoldingRow],
    catalog: &PortfolioCatalog,
) -> Vec<TradeSuggestion> {
    let in_scope: Vec<&HoldingRow> = holdings
        .iter()
        .filter(|row| match scope {
            PortfolioScope::All => true,
            PortfolioScope::Portfolio(id) => catalog.assignment(&row.code) == *id,
            PortfolioScope::Unassigned => catalog.assignment(&row.code) == UNASSIGNED,
        })
        .collect();

    let total_value: f64 = in_scope
        .iter()
        .filter_map(|row| row.current_value_lcy)
        .filter(|n| n.is_finite())
        .sum();

    let mut suggestions: Vec<TradeSuggestion> = in_scope
        .iter()
        .filter_map(|row| {
            let target_pct = catalog.instrument_target(&row.code)?;
            let current_value = row.current_value_lcy.filter(|n| n.is_finite()).unwrap_or(0.0);
            let target_value = target_pct / 100.0 * total_value;
            Some(TradeSuggestion {
                code: row.code.clone(),
                name: row.name.clone(),
                current_value,
                target_value,
                trade_amount: target_value - current_value,
            })
        })
        .collect();
    suggestions.sort_by(|a, b| a.code.cmp(&b.code));
    suggestions
}
