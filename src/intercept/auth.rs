// =============================================================================
// Ambient Auth Context — captured Platform-A request credentials
// =============================================================================
//
// Auth headers observed on outbound Platform-A calls are latent state: a
// later request missing one header must not erase a previously captured
// value. The context therefore merges per-field, last-non-empty-wins, and
// exposes explicit `get()` / `merge()` semantics rather than ambient
// mutation. Cookie and locally stored values act as fallbacks only when a
// header was never captured.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;

/// The three headers the performance BFF requires.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthHeaders {
    pub authorization: Option<String>,
    pub client_id: Option<String>,
    pub device_id: Option<String>,
}

impl AuthHeaders {
    /// Extract the interesting headers from a lower-cased request header map.
    pub fn from_request_headers(headers: &HashMap<String, String>) -> Self {
        let pick = |name: &str| {
            headers
                .get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            authorization: pick("authorization"),
            client_id: pick("client-id"),
            device_id: pick("device-id"),
        }
    }

    /// Whether a BFF request can be issued with these headers.
    pub fn is_usable(&self) -> bool {
        self.authorization.is_some()
    }
}

/// Fallback credential sources consulted when a header was never captured:
/// host-page cookies and the locally persisted client id.
#[derive(Debug, Clone, Default)]
pub struct AuthFallback {
    /// `webapp-sg-access-token` cookie (raw token, no scheme).
    pub cookie_access_token: Option<String>,
    /// `webapp-deviceId` cookie.
    pub cookie_device_id: Option<String>,
    /// Locally persisted `client-id`.
    pub stored_client_id: Option<String>,
}

/// Shared, mergeable auth capture.
#[derive(Default)]
pub struct AuthContext {
    captured: RwLock<AuthHeaders>,
}

impl AuthContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge newly observed headers. Per-field last-non-empty-wins: an
    /// absent or empty incoming field leaves the captured value alone.
    pub fn merge(&self, incoming: AuthHeaders) {
        let mut captured = self.captured.write();
        merge_field(&mut captured.authorization, incoming.authorization);
        merge_field(&mut captured.client_id, incoming.client_id);
        merge_field(&mut captured.device_id, incoming.device_id);
    }

    /// Snapshot of the captured headers.
    pub fn get(&self) -> AuthHeaders {
        self.captured.read().clone()
    }

    /// Captured headers with fallbacks filled in for never-captured fields.
    /// The cookie access token is promoted to a bearer authorization value.
    pub fn resolve(&self, fallback: &AuthFallback) -> AuthHeaders {
        let mut headers = self.get();
        if headers.authorization.is_none() {
            headers.authorization = fallback
                .cookie_access_token
                .as_deref()
                .map(|t| format!("Bearer {t}"));
        }
        if headers.device_id.is_none() {
            headers.device_id = fallback.cookie_device_id.clone();
        }
        if headers.client_id.is_none() {
            headers.client_id = fallback.stored_client_id.clone();
        }
        headers
    }
}

fn merge_field(current: &mut Option<String>, incoming: Option<String>) {
    if let Some(value) = incoming {
        if !value.is_empty() {
            *current = Some(value);
        }
    }
}
