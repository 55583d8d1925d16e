// =============================================================================
// Model Module
// =============================================================================
//
// Normaliser layer between raw endpoint payloads and the overlay's
// bucket × goal-type × goal model:
// - Defensive per-endpoint decoders (shape mismatch => None, never a panic)
// - BucketMap construction from the three Platform-A streams
// - Holdings extraction for Platform B

pub mod bucket;
pub mod decode;

pub use bucket::{
    build_bucket_map, growth_percent, split_goal_name, Bucket, BucketMap, Goal, GoalGroup,
    GoalType,
};
pub use decode::{
    decode_holdings, decode_investible, decode_performance, decode_summaries, HoldingRow,
    InvestibleRecord, PerformanceRecord, SummaryRecord,
};
