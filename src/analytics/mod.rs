// =============================================================================
// Analytics Module
// =============================================================================
//
// Turns the bucket model plus the overrides store into render-ready data:
// - Target / fixed-flag accessors and drift math
// - Platform-B portfolio catalog, tags, assignments, trade suggestions
// - Summary and bucket-detail view models (pure data, no DOM references)

pub mod portfolios;
pub mod targets;
pub mod view_model;

pub use portfolios::{
    slugify, trade_suggestions, unique_slug, DriftSettings, Portfolio, PortfolioCatalog,
    PortfolioError, PortfolioScope, TradeSuggestion, MAX_PORTFOLIO_NAME_LEN, UNASSIGNED,
};
pub use targets::{
    goal_drift, group_drift, remaining_needs_flag, remaining_target_pct, round_target,
    DriftInput, TargetStore,
};
pub use view_model::{
    build_bucket_detail, build_summary_view_model, collect_overrides, encode_projection_key,
    projection_amount, set_projection, BucketDetailViewModel, BucketSummary, GoalOverrides,
    GoalRow, GroupView, SummaryViewModel,
};
