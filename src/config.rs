// =============================================================================
// Service Configuration — environment-driven settings for gpv-syncd
// =============================================================================

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

/// Origins allowed by default: the two platforms the overlay runs on.
pub const DEFAULT_CORS_ORIGINS: [&str; 2] = [
    "https://app.sg.endowus.com",
    "https://secure.fundsupermart.com",
];

/// Default maximum encrypted-payload size in bytes.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 10_240;

/// Runtime configuration for the sync service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Listen address, e.g. `0.0.0.0:8787`.
    pub bind_addr: String,
    /// HMAC signing secret for access/refresh tokens.
    pub jwt_secret: String,
    /// CORS origin allowlist.
    pub cors_origins: Vec<String>,
    /// Upper bound on `encryptedData` bytes.
    pub max_payload_size: usize,
    /// Optional KV persistence path; in-memory when absent.
    pub kv_path: Option<PathBuf>,
    /// Production mode hides internal error details.
    pub production: bool,
}

impl ServiceConfig {
    /// Load from the environment. `JWT_SECRET` is mandatory; everything else
    /// has a default.
    pub fn from_env() -> Result<Self> {
        let jwt_secret = std::env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .context("JWT_SECRET must be set to a non-empty signing secret")?;

        let cors_origins = match std::env::var("CORS_ORIGINS") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .split(',')
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
        };

        let max_payload_size = std::env::var("MAX_PAYLOAD_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_PAYLOAD_SIZE);

        let config = Self {
            bind_addr: std::env::var("GPV_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8787".into()),
            jwt_secret,
            cors_origins,
            max_payload_size,
            kv_path: std::env::var("GPV_KV_PATH").ok().map(PathBuf::from),
            production: std::env::var("GPV_ENV")
                .map(|v| v.eq_ignore_ascii_case("production"))
                .unwrap_or(true),
        };

        info!(
            bind_addr = %config.bind_addr,
            origins = ?config.cors_origins,
            max_payload_size = config.max_payload_size,
            production = config.production,
            "service config loaded"
        );
        Ok(config)
    }

    /// Configuration suitable for tests: permissive clock, fixed secret.
    pub fn for_tests() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".into(),
            jwt_secret: "test-secret".into(),
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            kv_path: None,
            production: false,
        }
    }
}
