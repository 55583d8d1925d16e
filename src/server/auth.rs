// =============================================================================
// Token Auth — signed access/refresh pairs and identity validation
// =============================================================================
//
// Tokens are HS256-signed and carry `{sub, iat, exp, typ}`. Verification
// checks signature, expiry, and type: a refresh token is accepted exactly on
// `/auth/refresh`, an access token everywhere else. Password hashes are
// compared in constant time.
// =============================================================================

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::routes::ServiceState;
use std::sync::Arc;

/// Access-token lifetime: 15 minutes.
pub const ACCESS_TTL_SECS: i64 = 15 * 60;
/// Refresh-token lifetime: 60 days.
pub const REFRESH_TTL_SECS: i64 = 60 * 24 * 60 * 60;

/// Signed token payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub typ: String,
}

/// Which token type a call site expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

/// Token pair issued on login and refresh. Expiries are epoch milliseconds.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: i64,
    pub refresh_expires_at: i64,
}

/// Sign a fresh access/refresh pair for `user_id`.
pub fn issue_token_pair(user_id: &str, secret: &str, now_ms: i64) -> Result<IssuedTokens, ApiError> {
    let now_secs = now_ms / 1000;
    let key = EncodingKey::from_secret(secret.as_bytes());

    let sign = |typ: TokenKind, ttl_secs: i64| {
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now_secs,
            exp: now_secs + ttl_secs,
            typ: typ.as_str().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &key)
            .map_err(|e| ApiError::internal(format!("token signing failed: {e}"), true))
    };

    Ok(IssuedTokens {
        access_token: sign(TokenKind::Access, ACCESS_TTL_SECS)?,
        refresh_token: sign(TokenKind::Refresh, REFRESH_TTL_SECS)?,
        access_expires_at: (now_secs + ACCESS_TTL_SECS) * 1000,
        refresh_expires_at: (now_secs + REFRESH_TTL_SECS) * 1000,
    })
}

/// Verify signature, expiry, and token type.
pub fn verify_token(token: &str, secret: &str, expected: TokenKind) -> Result<Claims, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| ApiError::Unauthorized("invalid or expired token".into()))?;

    if data.claims.typ != expected.as_str() {
        return Err(ApiError::Unauthorized("wrong token type".into()));
    }
    Ok(data.claims)
}

/// Constant-time byte comparison for password hashes. Every byte is
/// examined even after a mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

// =============================================================================
// User id validation
// =============================================================================

/// A valid user id is a simple email or 3–50 characters of
/// `[A-Za-z0-9_-]`.
pub fn validate_user_id(user_id: &str) -> bool {
    is_simple_email(user_id) || is_handle(user_id)
}

fn is_handle(s: &str) -> bool {
    let len = s.chars().count();
    (3..=50).contains(&len)
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_simple_email(s: &str) -> bool {
    let mut parts = s.splitn(2, '@');
    let (Some(local), Some(domain)) = (parts.next(), parts.next()) else {
        return false;
    };
    if local.is_empty() || domain.is_empty() || s.contains(char::is_whitespace) {
        return false;
    }
    if s.len() > 254 || domain.contains('@') {
        return false;
    }
    // The domain needs at least one dot with non-empty labels around it.
    domain.contains('.') && domain.split('.').all(|label| !label.is_empty())
}

// =============================================================================
// Extractors
// =============================================================================

/// Extracts the raw bearer token from the Authorization header.
pub fn bearer_token(headers: &axum::http::HeaderMap) -> Result<String, ApiError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing authorization header".into()))?;

    match header.strip_prefix("Bearer ") {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(ApiError::Unauthorized("malformed authorization header".into())),
    }
}

/// Axum extractor yielding the verified access-token claims. Rejects with a
/// 401 error body before the handler runs.
pub struct AccessUser(pub Claims);

#[axum::async_trait]
impl FromRequestParts<Arc<ServiceState>> for AccessUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ServiceState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let claims = verify_token(&token, &state.config.jwt_secret, TokenKind::Access)?;
        Ok(AccessUser(claims))
    }
}
