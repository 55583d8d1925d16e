// =============================================================================
// Performance Module
// =============================================================================
//
// Per-goal performance series handling:
// - BFF payload decoding into [`PerformanceSeries`]
// - Window-return derivation from the raw time series
// - Cross-goal weighted aggregation
// - TTL cache over the config store
// - Sequential, polite fetch queue with captured auth

pub mod aggregate;
pub mod cache;
pub mod queue;
pub mod series;
pub mod windows;

pub use aggregate::{aggregate, weighted_mean, AggregateMetrics};
pub use cache::{PerformanceCache, FORCE_REFRESH_MIN_INTERVAL_MS, PERFORMANCE_TTL_MS};
pub use queue::{http_fetcher, FetchFn, PerformanceQueue, QueueConfig};
pub use series::{decode_bff_performance, PerformanceSeries, ReturnsTable, SeriesPoint};
pub use windows::{derive_window_return, resolve_window_return, ReturnWindow};
