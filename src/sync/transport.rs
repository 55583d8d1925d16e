// =============================================================================
// Sync Transport — HTTP client for the companion edge service
// =============================================================================
//
// Thin reqwest wrapper speaking the service's JSON wire protocol. Outcomes
// are typed so the state machine can route 409 into the conflict wizard and
// 401 into the refresh path without string-matching status codes. All
// outbound requests carry the internal tag header so the interception layer
// ignores them.
// =============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::intercept::INTERNAL_TAG_HEADER;

/// Default sync HTTP deadline.
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// SHA-256 hex of a password. The service stores and compares only this
/// digest; the plaintext never leaves the client.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

// =============================================================================
// Wire types
// =============================================================================

/// Access/refresh token pair with expiries (epoch ms).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: i64,
    pub refresh_expires_at: i64,
}

/// The server's stored record, as echoed in downloads and conflicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    pub encrypted_data: String,
    #[serde(default)]
    pub device_id: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub version: u32,
}

/// Upload request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub user_id: String,
    pub device_id: String,
    pub encrypted_data: String,
    pub timestamp: i64,
    pub version: u32,
    pub force: bool,
}

/// Typed outcome of an upload.
#[derive(Debug)]
pub enum UploadOutcome {
    /// 200 — the server-stored timestamp to adopt as `lastSyncAt`.
    Accepted { timestamp: i64 },
    /// 409 — the server's current record, for the conflict wizard.
    Conflict { server: ServerRecord },
    Unauthorized,
    PayloadTooLarge,
    RateLimited { retry_after_secs: Option<u64> },
    Failed { status: u16 },
}

/// Typed outcome of a download.
#[derive(Debug)]
pub enum DownloadOutcome {
    Found(ServerRecord),
    /// 404 — an empty remote, not an error.
    NotFound,
    Unauthorized,
    Failed { status: u16 },
}

// =============================================================================
// Transport
// =============================================================================

/// HTTP client bound to one sync service base URL.
#[derive(Clone)]
pub struct SyncTransport {
    base_url: String,
    http: reqwest::Client,
}

impl SyncTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ---- Auth --------------------------------------------------------------

    /// POST /auth/register.
    pub async fn register(&self, user_id: &str, password: &str) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/auth/register", self.base_url))
            .header(INTERNAL_TAG_HEADER, "1")
            .json(&json!({ "userId": user_id, "passwordHash": hash_password(password) }))
            .send()
            .await
            .context("register request failed")?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body: Value = resp.json().await.unwrap_or_default();
            anyhow::bail!(
                "registration rejected ({status}): {}",
                body.get("message").and_then(Value::as_str).unwrap_or("")
            )
        }
    }

    /// POST /auth/login. `Ok(None)` on bad credentials.
    pub async fn login(&self, user_id: &str, password: &str) -> Result<Option<TokenPair>> {
        let resp = self
            .http
            .post(format!("{}/auth/login", self.base_url))
            .header(INTERNAL_TAG_HEADER, "1")
            .json(&json!({ "userId": user_id, "passwordHash": hash_password(password) }))
            .send()
            .await
            .context("login request failed")?;

        match resp.status().as_u16() {
            200 => {
                let pair: TokenPair = resp.json().await.context("malformed login response")?;
                Ok(Some(pair))
            }
            401 => Ok(None),
            status => anyhow::bail!("login failed with status {status}"),
        }
    }

    /// POST /auth/refresh with the refresh token. `Ok(None)` when the token
    /// is no longer accepted.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Option<TokenPair>> {
        let resp = self
            .http
            .post(format!("{}/auth/refresh", self.base_url))
            .header(INTERNAL_TAG_HEADER, "1")
            .bearer_auth(refresh_token)
            .send()
            .await
            .context("refresh request failed")?;

        match resp.status().as_u16() {
            200 => {
                let pair: TokenPair = resp.json().await.context("malformed refresh response")?;
                Ok(Some(pair))
            }
            401 | 403 => Ok(None),
            status => anyhow::bail!("refresh failed with status {status}"),
        }
    }

    // ---- Blob CRUD ---------------------------------------------------------

    /// POST /sync.
    pub async fn upload(&self, access_token: &str, request: &UploadRequest) -> Result<UploadOutcome> {
        let resp = self
            .http
            .post(format!("{}/sync", self.base_url))
            .header(INTERNAL_TAG_HEADER, "1")
            .bearer_auth(access_token)
            .json(request)
            .send()
            .await
            .context("sync upload failed")?;

        let status = resp.status().as_u16();
        match status {
            200 => {
                let body: Value = resp.json().await.context("malformed upload response")?;
                let timestamp = body
                    .get("timestamp")
                    .and_then(Value::as_i64)
                    .context("upload response missing timestamp")?;
                Ok(UploadOutcome::Accepted { timestamp })
            }
            409 => {
                let body: Value = resp.json().await.context("malformed conflict response")?;
                let server = body
                    .get("serverData")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .context("conflict response missing serverData")?;
                Ok(UploadOutcome::Conflict { server })
            }
            401 => Ok(UploadOutcome::Unauthorized),
            413 => Ok(UploadOutcome::PayloadTooLarge),
            429 => {
                let retry_after_secs = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                Ok(UploadOutcome::RateLimited { retry_after_secs })
            }
            _ => {
                warn!(status, "sync upload failed");
                Ok(UploadOutcome::Failed { status })
            }
        }
    }

    /// GET /sync/:userId.
    pub async fn download(&self, access_token: &str, user_id: &str) -> Result<DownloadOutcome> {
        let resp = self
            .http
            .get(format!("{}/sync/{user_id}", self.base_url))
            .header(INTERNAL_TAG_HEADER, "1")
            .bearer_auth(access_token)
            .send()
            .await
            .context("sync download failed")?;

        match resp.status().as_u16() {
            200 => {
                let body: Value = resp.json().await.context("malformed download response")?;
                let record = body
                    .get("data")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .context("download response missing data")?;
                Ok(DownloadOutcome::Found(record))
            }
            404 => Ok(DownloadOutcome::NotFound),
            401 => Ok(DownloadOutcome::Unauthorized),
            status => Ok(DownloadOutcome::Failed { status }),
        }
    }

    /// DELETE /sync/:userId. `Ok(true)` on 200, `Ok(false)` on 401.
    pub async fn delete(&self, access_token: &str, user_id: &str) -> Result<bool> {
        let resp = self
            .http
            .delete(format!("{}/sync/{user_id}", self.base_url))
            .header(INTERNAL_TAG_HEADER, "1")
            .bearer_auth(access_token)
            .send()
            .await
            .context("sync delete failed")?;

        match resp.status().as_u16() {
            200 => Ok(true),
            401 => Ok(false),
            status => anyhow::bail!("delete failed with status {status}"),
        }
    }
}

impl std::fmt::Debug for SyncTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_is_sha256_hex() {
        // Known digest of "password".
        assert_eq!(
            hash_password("password"),
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
        );
    }

    #[test]
    fn base_url_trailing_slash_is_normalised() {
        let transport = SyncTransport::new("https://sync.example/");
        assert_eq!(transport.base_url(), "https://sync.example");
    }

    #[test]
    fn upload_request_serialises_camel_case() {
        let request = UploadRequest {
            user_id: "alice".into(),
            device_id: "dev-1".into(),
            encrypted_data: "AAAA".into(),
            timestamp: 1_000,
            version: 2,
            force: false,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("userId").is_some());
        assert!(value.get("encryptedData").is_some());
        assert!(value.get("force").is_some());
    }
}
