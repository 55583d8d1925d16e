// =============================================================================
// Server Module — the companion sync service
// =============================================================================
//
// Authenticated opaque-blob storage with conflict detection. The service
// stores and serves ciphertext only; it has no ability to read user data.

pub mod auth;
pub mod error;
pub mod kv;
pub mod rate_limit;
pub mod routes;

pub use auth::{issue_token_pair, validate_user_id, verify_token, Claims, TokenKind};
pub use error::ApiError;
pub use kv::{FileKv, KvStore, MemoryKv, SyncRecord, UserRecord};
pub use rate_limit::{route_limit, RateLimiter};
pub use routes::{router, ServiceState};
