// =============================================================================
// REST Routes — Axum 0.7
// =============================================================================
//
// Public: /health, /auth/register, /auth/login. /auth/refresh takes a
// refresh bearer; every /sync route takes an access bearer whose subject
// must match the addressed user. Conflict detection is timestamp-based, not
// transactional: a single user's uploads from one device are serialised by
// the client, and multi-device races resolve through the explicit conflict
// flow. A force upload stores the server clock instead of the client
// timestamp — the client adopts the returned value, which keeps later
// detection monotonic.
//
// CORS echoes exactly one allowlisted origin and always varies on Origin.
// Every JSON response carries no-store cache headers.
// =============================================================================

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, info};

use super::auth::{
    bearer_token, constant_time_eq, issue_token_pair, validate_user_id, verify_token, AccessUser,
    TokenKind,
};
use super::error::ApiError;
use super::kv::{sync_key, user_key, KvStore, SyncRecord, UserRecord};
use super::rate_limit::RateLimiter;
use crate::config::ServiceConfig;

/// Upload timestamps may lead the server clock by at most this much.
const MAX_TIMESTAMP_SKEW_MS: i64 = 5 * 60 * 1000;

// =============================================================================
// State
// =============================================================================

/// Shared service state: config, KV binding, and the rate limiter.
pub struct ServiceState {
    pub config: ServiceConfig,
    pub kv: Arc<dyn KvStore>,
    pub limiter: RateLimiter,
}

impl ServiceState {
    pub fn new(config: ServiceConfig, kv: Arc<dyn KvStore>) -> Self {
        let limiter = RateLimiter::new(kv.clone());
        Self {
            config,
            kv,
            limiter,
        }
    }

    fn rate_check(&self, identity: &str, route: &str, method: &str) -> Result<(), ApiError> {
        let decision = self
            .limiter
            .check(identity, route, method, Utc::now().timestamp_millis());
        if decision.allowed {
            Ok(())
        } else {
            Err(ApiError::RateLimited {
                retry_after_secs: decision.retry_after_secs,
            })
        }
    }

    fn load_sync_record(&self, user_id: &str) -> Option<SyncRecord> {
        self.kv
            .get(&sync_key(user_id))
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

// =============================================================================
// Router construction
// =============================================================================

/// Build the full router with CORS and cache-header middleware.
pub fn router(state: Arc<ServiceState>) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/sync", post(upload))
        .route("/sync/:userId", get(download).delete(delete_blob))
        .layer(cors)
        .layer(middleware::from_fn(preflight_no_content))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .with_state(state)
}

/// Preflight responses are `204 No Content`. The CORS layer answers the
/// preflight itself with a 200 and an empty body; this outer middleware
/// rewrites the status, leaving the CORS headers (or their absence, for a
/// disallowed origin) untouched.
async fn preflight_no_content(request: Request, next: Next) -> Response {
    let is_preflight = request.method() == Method::OPTIONS
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    let mut response = next.run(request).await;
    if is_preflight && response.status().is_success() {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

// =============================================================================
// Health (public)
// =============================================================================

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().timestamp_millis(),
    }))
}

// =============================================================================
// Auth
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsBody {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    password_hash: String,
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

async fn register(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<CredentialsBody>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = if body.user_id.is_empty() {
        "anonymous"
    } else {
        body.user_id.as_str()
    };
    state.rate_check(identity, "/auth/register", "POST")?;

    if !validate_user_id(&body.user_id) {
        return Err(ApiError::BadRequest(
            "userId must be an email or 3-50 alphanumeric/underscore/hyphen characters".into(),
        ));
    }
    if !is_sha256_hex(&body.password_hash) {
        return Err(ApiError::BadRequest(
            "passwordHash must be a SHA-256 hex digest".into(),
        ));
    }
    if state.kv.get(&user_key(&body.user_id)).is_some() {
        return Err(ApiError::BadRequest("userId already registered".into()));
    }

    let record = UserRecord {
        password_hash: body.password_hash,
        created_at: Utc::now().timestamp_millis(),
    };
    match serde_json::to_value(&record) {
        Ok(value) => state.kv.put(&user_key(&body.user_id), value),
        Err(e) => return Err(ApiError::internal(e.to_string(), state.config.production)),
    }

    info!(user_id = %body.user_id, "user registered");
    Ok(Json(json!({ "success": true })))
}

async fn login(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<CredentialsBody>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = if body.user_id.is_empty() {
        "anonymous"
    } else {
        body.user_id.as_str()
    };
    state.rate_check(identity, "/auth/login", "POST")?;

    // One neutral message for unknown users and bad hashes alike.
    let neutral = || ApiError::Unauthorized("invalid credentials".into());

    let record: UserRecord = state
        .kv
        .get(&user_key(&body.user_id))
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_else(neutral)?;

    if !constant_time_eq(record.password_hash.as_bytes(), body.password_hash.as_bytes()) {
        return Err(neutral());
    }

    let tokens = issue_token_pair(
        &body.user_id,
        &state.config.jwt_secret,
        Utc::now().timestamp_millis(),
    )?;
    let mut response = serde_json::to_value(&tokens)
        .map_err(|e| ApiError::internal(e.to_string(), state.config.production))?;
    response["success"] = json!(true);

    info!(user_id = %body.user_id, "login succeeded");
    Ok(Json(response))
}

async fn refresh(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)?;
    let claims = verify_token(&token, &state.config.jwt_secret, TokenKind::Refresh)?;
    state.rate_check(&claims.sub, "/auth/refresh", "POST")?;

    let tokens = issue_token_pair(
        &claims.sub,
        &state.config.jwt_secret,
        Utc::now().timestamp_millis(),
    )?;
    let mut response = serde_json::to_value(&tokens)
        .map_err(|e| ApiError::internal(e.to_string(), state.config.production))?;
    response["success"] = json!(true);

    debug!(user_id = %claims.sub, "token pair refreshed");
    Ok(Json(response))
}

// =============================================================================
// Blob upload
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadBody {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    device_id: String,
    #[serde(default)]
    encrypted_data: String,
    #[serde(default)]
    timestamp: i64,
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    force: bool,
}

fn default_version() -> u32 {
    1
}

/// What the upload algorithm decided, separated out so the monotonicity
/// rules are unit-testable without HTTP plumbing.
#[derive(Debug, PartialEq)]
pub enum UploadDecision {
    /// Reject with the server's current record.
    Conflict,
    /// Persist with this timestamp.
    Store { timestamp: i64 },
}

/// Accept a timestamp iff it is not older than the stored record, unless
/// forced. A forced store uses the server clock, which the client then
/// adopts.
pub fn decide_upload(
    existing_timestamp: Option<i64>,
    body_timestamp: i64,
    force: bool,
    now_ms: i64,
) -> UploadDecision {
    if let Some(existing) = existing_timestamp {
        if existing > body_timestamp && !force {
            return UploadDecision::Conflict;
        }
    }
    UploadDecision::Store {
        timestamp: if force { now_ms } else { body_timestamp },
    }
}

fn validate_upload(body: &UploadBody, max_payload: usize, now_ms: i64) -> Result<(), ApiError> {
    if body.encrypted_data.is_empty() {
        return Err(ApiError::BadRequest("encryptedData is required".into()));
    }
    if body.encrypted_data.len() > max_payload {
        return Err(ApiError::PayloadTooLarge);
    }
    if body.device_id.is_empty() {
        return Err(ApiError::BadRequest("deviceId is required".into()));
    }
    if body.timestamp <= 0 {
        return Err(ApiError::BadRequest("timestamp must be a positive number".into()));
    }
    if body.timestamp > now_ms + MAX_TIMESTAMP_SKEW_MS {
        return Err(ApiError::BadRequest("timestamp is too far in the future".into()));
    }
    if body.version < 1 {
        return Err(ApiError::BadRequest("version must be >= 1".into()));
    }
    Ok(())
}

async fn upload(
    State(state): State<Arc<ServiceState>>,
    AccessUser(claims): AccessUser,
    Json(body): Json<UploadBody>,
) -> Result<Response, ApiError> {
    if claims.sub != body.user_id {
        return Err(ApiError::Forbidden("token subject does not match userId".into()));
    }
    state.rate_check(&claims.sub, "/sync", "POST")?;

    let now_ms = Utc::now().timestamp_millis();
    validate_upload(&body, state.config.max_payload_size, now_ms)?;

    let existing = state.load_sync_record(&body.user_id);
    match decide_upload(
        existing.as_ref().map(|r| r.timestamp),
        body.timestamp,
        body.force,
        now_ms,
    ) {
        UploadDecision::Conflict => {
            // The record exists whenever the decision is a conflict.
            let server = existing.expect("conflict requires an existing record");
            info!(user_id = %body.user_id, server_timestamp = server.timestamp, "upload conflict");
            Ok((
                StatusCode::CONFLICT,
                Json(json!({
                    "success": false,
                    "error": "CONFLICT",
                    "message": "server has newer data",
                    "serverData": server,
                })),
            )
                .into_response())
        }
        UploadDecision::Store { timestamp } => {
            let record = SyncRecord {
                encrypted_data: body.encrypted_data,
                device_id: body.device_id,
                timestamp,
                version: body.version,
            };
            match serde_json::to_value(&record) {
                Ok(value) => state.kv.put(&sync_key(&body.user_id), value),
                Err(e) => {
                    return Err(ApiError::internal(e.to_string(), state.config.production))
                }
            }
            debug!(user_id = %body.user_id, timestamp, forced = body.force, "blob stored");
            Ok(Json(json!({ "success": true, "timestamp": timestamp })).into_response())
        }
    }
}

// =============================================================================
// Blob download / delete
// =============================================================================

async fn download(
    State(state): State<Arc<ServiceState>>,
    AccessUser(claims): AccessUser,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if claims.sub != user_id {
        return Err(ApiError::Forbidden("token subject does not match userId".into()));
    }
    state.rate_check(&claims.sub, "/sync/:userId", "GET")?;

    match state.load_sync_record(&user_id) {
        Some(record) => Ok(Json(json!({ "success": true, "data": record }))),
        None => Err(ApiError::NotFound),
    }
}

async fn delete_blob(
    State(state): State<Arc<ServiceState>>,
    AccessUser(claims): AccessUser,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if claims.sub != user_id {
        return Err(ApiError::Forbidden("token subject does not match userId".into()));
    }
    state.rate_check(&claims.sub, "/sync/:userId", "DELETE")?;

    // Idempotent: 200 whether or not a record existed.
    state.kv.delete(&sync_key(&user_id));
    info!(user_id = %user_id, "blob deleted");
    Ok(Json(json!({ "success": true })))
}
