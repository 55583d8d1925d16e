// =============================================================================
// Sync Client — end-to-end-encrypted, config-only synchronisation
// =============================================================================
//
// Owns the envelope lifecycle: collect → encrypt → upload, download → decrypt
// → promote → apply, conflict wizard, token refresh, and scheduling. The
// client is single-owner and cooperative: at most one sync operation is in
// flight; a change arriving mid-sync defers via a short retry delay instead
// of queueing a second upload, and identical payloads are skipped by content
// hash before any network traffic.
//
// The force flag deliberately breaks server-side timestamp monotonicity for
// the "keep this device" resolution. That is only sound because this client
// always adopts the server-returned timestamp as its new `lastSyncAt`, which
// restores monotonic conflict detection afterwards.

pub mod envelope;
pub mod transport;
pub mod wizard;

pub use envelope::{
    apply, collect, content_hash, is_synced_key, promote, EnvelopeMetadata, PlatformAConfig,
    PlatformBConfig, Platforms, SyncEnvelope, SYNC_SCHEMA_VERSION,
};
pub use transport::{
    hash_password, DownloadOutcome, ServerRecord, SyncTransport, TokenPair, UploadOutcome,
    UploadRequest,
};
pub use wizard::{
    AssignmentChange, ConflictDiff, ConflictSummary, ConflictWizard, PortfolioChange, Resolution,
    SettingChange, WizardStep,
};

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::crypto::{self, CryptoError, MasterKey};
use crate::store::ConfigStore;

// Config-store keys governing sync itself. None of these are ever collected
// into an envelope.
pub const KEY_ENABLED: &str = "sync_enabled";
pub const KEY_SERVER_URL: &str = "sync_server_url";
pub const KEY_USER_ID: &str = "sync_user_id";
pub const KEY_DEVICE_ID: &str = "sync_device_id";
pub const KEY_ACCESS_TOKEN: &str = "sync_access_token";
pub const KEY_REFRESH_TOKEN: &str = "sync_refresh_token";
pub const KEY_ACCESS_EXPIRY: &str = "sync_access_token_expiry";
pub const KEY_REFRESH_EXPIRY: &str = "sync_refresh_token_expiry";
pub const KEY_LAST_SYNC: &str = "sync_last_sync";
pub const KEY_REMEMBER_KEY: &str = "sync_remember_key";
pub const KEY_MASTER_KEY: &str = "sync_master_key";

// =============================================================================
// Service abstraction
// =============================================================================

/// The slice of the wire protocol the state machine drives. Production uses
/// [`SyncTransport`]; tests inject an in-memory service. Returned futures
/// are `Send` so the client's background loops can be spawned onto tokio.
pub trait SyncApi: Send + Sync {
    fn register(
        &self,
        user_id: &str,
        password: &str,
    ) -> impl Future<Output = Result<()>> + Send;
    fn login(
        &self,
        user_id: &str,
        password: &str,
    ) -> impl Future<Output = Result<Option<TokenPair>>> + Send;
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<Option<TokenPair>>> + Send;
    fn upload(
        &self,
        access_token: &str,
        request: &UploadRequest,
    ) -> impl Future<Output = Result<UploadOutcome>> + Send;
    fn download(
        &self,
        access_token: &str,
        user_id: &str,
    ) -> impl Future<Output = Result<DownloadOutcome>> + Send;
    fn delete(
        &self,
        access_token: &str,
        user_id: &str,
    ) -> impl Future<Output = Result<bool>> + Send;
}

impl SyncApi for SyncTransport {
    async fn register(&self, user_id: &str, password: &str) -> Result<()> {
        SyncTransport::register(self, user_id, password).await
    }
    async fn login(&self, user_id: &str, password: &str) -> Result<Option<TokenPair>> {
        SyncTransport::login(self, user_id, password).await
    }
    async fn refresh(&self, refresh_token: &str) -> Result<Option<TokenPair>> {
        SyncTransport::refresh(self, refresh_token).await
    }
    async fn upload(&self, access_token: &str, request: &UploadRequest) -> Result<UploadOutcome> {
        SyncTransport::upload(self, access_token, request).await
    }
    async fn download(&self, access_token: &str, user_id: &str) -> Result<DownloadOutcome> {
        SyncTransport::download(self, access_token, user_id).await
    }
    async fn delete(&self, access_token: &str, user_id: &str) -> Result<bool> {
        SyncTransport::delete(self, access_token, user_id).await
    }
}

// =============================================================================
// Status
// =============================================================================

/// User-visible sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    Disabled,
    Syncing,
    Synced,
    Error,
    Conflict,
    Unauthenticated,
}

/// Snapshot for the overlay's sync indicator.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSnapshot {
    pub status: SyncStatus,
    pub last_sync_at: Option<i64>,
    pub message: Option<String>,
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncResult {
    Disabled,
    /// Another sync is in flight; retry after a short delay.
    Busy,
    /// Content hash matched the server mirror; nothing uploaded.
    Skipped,
    Synced { timestamp: i64 },
    Conflict,
    Unauthenticated,
    Error(String),
}

/// Scheduling knobs.
#[derive(Debug, Clone)]
pub struct SyncClientConfig {
    /// Quiet period after a config change before syncing.
    pub debounce: Duration,
    /// Delay before retrying when a sync was already in flight.
    pub busy_retry_delay: Duration,
    /// Auto-sync period once activated.
    pub auto_sync_interval: Duration,
}

impl Default for SyncClientConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            busy_retry_delay: Duration::from_secs(5),
            auto_sync_interval: Duration::from_secs(30 * 60),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Process-wide sync client. Construct one at startup and pass it explicitly.
pub struct SyncClient<A: SyncApi = SyncTransport> {
    store: Arc<ConfigStore>,
    api: A,
    config: SyncClientConfig,
    status: RwLock<SyncStatus>,
    message: RwLock<Option<String>>,
    /// Session-only passphrase; never persisted.
    passphrase: RwLock<Option<String>>,
    last_server_hash: RwLock<Option<String>>,
    in_flight: AtomicBool,
    change_generation: AtomicU64,
    wizard: RwLock<Option<ConflictWizard>>,
}

impl<A: SyncApi> SyncClient<A> {
    pub fn new(store: Arc<ConfigStore>, api: A, config: SyncClientConfig) -> Self {
        let enabled = store.get_bool(KEY_ENABLED).unwrap_or(false);
        Self {
            store,
            api,
            config,
            status: RwLock::new(if enabled {
                SyncStatus::Synced
            } else {
                SyncStatus::Disabled
            }),
            message: RwLock::new(None),
            passphrase: RwLock::new(None),
            last_server_hash: RwLock::new(None),
            in_flight: AtomicBool::new(false),
            change_generation: AtomicU64::new(0),
            wizard: RwLock::new(None),
        }
    }

    // ---- Status --------------------------------------------------------------

    fn set_status(&self, status: SyncStatus, message: Option<String>) {
        *self.status.write() = status;
        *self.message.write() = message;
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            status: *self.status.read(),
            last_sync_at: self.store.get_i64(KEY_LAST_SYNC),
            message: self.message.read().clone(),
        }
    }

    pub fn enable(&self) {
        self.store.set(KEY_ENABLED, json!(true));
        self.set_status(SyncStatus::Synced, None);
    }

    pub fn disable(&self) {
        self.store.set(KEY_ENABLED, json!(false));
        self.set_status(SyncStatus::Disabled, None);
    }

    fn enabled(&self) -> bool {
        self.store.get_bool(KEY_ENABLED).unwrap_or(false)
    }

    // ---- Identity & keys -----------------------------------------------------

    /// Stable per-device id, provisioned on first use.
    pub fn device_id(&self) -> String {
        if let Some(id) = self.store.get_str(KEY_DEVICE_ID) {
            return id;
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.store.set(KEY_DEVICE_ID, json!(id));
        id
    }

    /// Provide the session passphrase. With `remember`, only the derived key
    /// material is persisted — never the passphrase itself.
    pub fn set_passphrase(&self, passphrase: &str, remember: bool) {
        *self.passphrase.write() = Some(passphrase.to_string());
        if remember {
            let master = MasterKey::derive(passphrase);
            self.store.set(KEY_MASTER_KEY, json!(master.to_hex()));
            self.store.set(KEY_REMEMBER_KEY, json!(true));
        }
    }

    fn remembered_master(&self) -> Option<MasterKey> {
        if !self.store.get_bool(KEY_REMEMBER_KEY).unwrap_or(false) {
            return None;
        }
        self.store
            .get_str(KEY_MASTER_KEY)
            .and_then(|hex| MasterKey::from_hex(&hex))
    }

    fn encrypt_payload(&self, plaintext: &str) -> Option<String> {
        if let Some(passphrase) = self.passphrase.read().as_deref() {
            return Some(crypto::encrypt(plaintext, passphrase));
        }
        self.remembered_master()
            .map(|master| crypto::encrypt_with_master(plaintext, &master))
    }

    fn decrypt_payload(&self, data: &str) -> Result<String, CryptoError> {
        if let Some(passphrase) = self.passphrase.read().as_deref() {
            return crypto::decrypt(data, passphrase);
        }
        match self.remembered_master() {
            Some(master) => crypto::decrypt_with_master(data, &master),
            None => Err(CryptoError::Malformed("no encryption key available")),
        }
    }

    // ---- Tokens --------------------------------------------------------------

    fn store_token_pair(&self, pair: &TokenPair) {
        self.store.update_many(vec![
            (KEY_ACCESS_TOKEN.to_string(), Some(json!(pair.access_token))),
            (KEY_REFRESH_TOKEN.to_string(), Some(json!(pair.refresh_token))),
            (KEY_ACCESS_EXPIRY.to_string(), Some(json!(pair.access_expires_at))),
            (KEY_REFRESH_EXPIRY.to_string(), Some(json!(pair.refresh_expires_at))),
        ]);
    }

    /// Register a new account on the configured service.
    pub async fn register(&self, user_id: &str, password: &str) -> Result<()> {
        self.api.register(user_id, password).await
    }

    /// Log in and persist the token pair. `Ok(false)` on bad credentials.
    pub async fn login(&self, user_id: &str, password: &str) -> Result<bool> {
        match self.api.login(user_id, password).await? {
            Some(pair) => {
                self.store.set(KEY_USER_ID, json!(user_id));
                self.store_token_pair(&pair);
                self.set_status(SyncStatus::Synced, None);
                info!(user_id, "sync login succeeded");
                Ok(true)
            }
            None => {
                self.set_status(SyncStatus::Unauthenticated, Some("invalid credentials".into()));
                Ok(false)
            }
        }
    }

    /// One refresh attempt. Failure transitions to `Unauthenticated`.
    async fn refresh_once(&self) -> bool {
        let Some(refresh_token) = self.store.get_str(KEY_REFRESH_TOKEN) else {
            self.set_status(SyncStatus::Unauthenticated, Some("not logged in".into()));
            return false;
        };
        match self.api.refresh(&refresh_token).await {
            Ok(Some(pair)) => {
                self.store_token_pair(&pair);
                true
            }
            Ok(None) => {
                warn!("refresh token rejected — login required");
                self.set_status(SyncStatus::Unauthenticated, Some("session expired".into()));
                false
            }
            Err(e) => {
                self.set_status(SyncStatus::Error, Some(format!("refresh failed: {e}")));
                false
            }
        }
    }

    // ---- Upload --------------------------------------------------------------

    /// Run one sync pass now. Serialised: a concurrent call returns `Busy`.
    pub async fn sync_now(&self) -> SyncResult {
        if !self.enabled() {
            return SyncResult::Disabled;
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return SyncResult::Busy;
        }
        let result = self.run_upload(false).await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn run_upload(&self, force: bool) -> SyncResult {
        let Some(user_id) = self.store.get_str(KEY_USER_ID) else {
            self.set_status(SyncStatus::Unauthenticated, Some("not logged in".into()));
            return SyncResult::Unauthenticated;
        };

        let now = Utc::now().timestamp_millis();
        let local = collect(&self.store, now);
        let hash = content_hash(&local);

        if !force && self.last_server_hash.read().as_deref() == Some(hash.as_str()) {
            debug!("sync skipped — payload identical to server mirror");
            return SyncResult::Skipped;
        }

        self.set_status(SyncStatus::Syncing, None);

        let plaintext = match serde_json::to_string(&local) {
            Ok(s) => s,
            Err(e) => {
                self.set_status(SyncStatus::Error, Some(format!("serialise failed: {e}")));
                return SyncResult::Error("serialise failed".into());
            }
        };
        let Some(encrypted) = self.encrypt_payload(&plaintext) else {
            self.set_status(SyncStatus::Error, Some("no encryption key set".into()));
            return SyncResult::Error("no encryption key set".into());
        };

        let request = UploadRequest {
            user_id,
            device_id: self.device_id(),
            encrypted_data: encrypted,
            timestamp: now,
            version: SYNC_SCHEMA_VERSION,
            force,
        };

        // On a 401 the client refreshes exactly once, then retries once.
        for attempt in 0..2 {
            let Some(access) = self.store.get_str(KEY_ACCESS_TOKEN) else {
                self.set_status(SyncStatus::Unauthenticated, Some("not logged in".into()));
                return SyncResult::Unauthenticated;
            };

            let outcome = match self.api.upload(&access, &request).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.set_status(SyncStatus::Error, Some(format!("upload failed: {e}")));
                    return SyncResult::Error(format!("upload failed: {e}"));
                }
            };

            match outcome {
                UploadOutcome::Accepted { timestamp } => {
                    // Always adopt the server's timestamp — on force uploads
                    // this is what keeps later conflict detection monotonic.
                    self.store.set(KEY_LAST_SYNC, json!(timestamp));
                    *self.last_server_hash.write() = Some(hash);
                    self.set_status(SyncStatus::Synced, None);
                    return SyncResult::Synced { timestamp };
                }
                UploadOutcome::Conflict { server } => {
                    return self.open_conflict(local, server);
                }
                UploadOutcome::Unauthorized => {
                    if attempt == 0 && self.refresh_once().await {
                        continue;
                    }
                    return SyncResult::Unauthenticated;
                }
                UploadOutcome::PayloadTooLarge => {
                    self.set_status(SyncStatus::Error, Some("payload too large".into()));
                    return SyncResult::Error("payload too large".into());
                }
                UploadOutcome::RateLimited { retry_after_secs } => {
                    let message = match retry_after_secs {
                        Some(secs) => format!("rate limited — retry in {secs}s"),
                        None => "rate limited".to_string(),
                    };
                    self.set_status(SyncStatus::Error, Some(message.clone()));
                    return SyncResult::Error(message);
                }
                UploadOutcome::Failed { status } => {
                    self.set_status(SyncStatus::Error, Some(format!("server error {status}")));
                    return SyncResult::Error(format!("server error {status}"));
                }
            }
        }
        SyncResult::Unauthenticated
    }

    // ---- Conflicts -----------------------------------------------------------

    fn open_conflict(&self, local: SyncEnvelope, server: ServerRecord) -> SyncResult {
        let remote = match self.decrypt_payload(&server.encrypted_data) {
            Ok(plaintext) => match serde_json::from_str::<Value>(&plaintext).ok().as_ref().and_then(promote) {
                Some(envelope) => envelope,
                None => {
                    self.set_status(SyncStatus::Error, Some("server envelope unreadable".into()));
                    return SyncResult::Error("server envelope unreadable".into());
                }
            },
            Err(CryptoError::WrongKey) => {
                // Local plaintext is never touched on a key mismatch.
                self.set_status(SyncStatus::Error, Some("WRONG_KEY: cannot read server data".into()));
                return SyncResult::Error("WRONG_KEY".into());
            }
            Err(e) => {
                self.set_status(SyncStatus::Error, Some(e.to_string()));
                return SyncResult::Error(e.to_string());
            }
        };

        info!(server_timestamp = server.timestamp, "sync conflict — opening wizard");
        *self.wizard.write() = Some(ConflictWizard::new(local, remote, server.timestamp));
        self.set_status(SyncStatus::Conflict, None);
        SyncResult::Conflict
    }

    /// Mutable access to the open wizard (step navigation, search, choice).
    pub fn with_wizard<R>(&self, f: impl FnOnce(&mut ConflictWizard) -> R) -> Option<R> {
        self.wizard.write().as_mut().map(f)
    }

    /// Close the wizard without resolving. Local state is untouched; the
    /// conflict remains outstanding on the server.
    pub fn cancel_conflict(&self) {
        if self.wizard.write().take().is_some() {
            self.set_status(SyncStatus::Error, Some("conflict unresolved".into()));
        }
    }

    /// Apply the user's decision from the wizard.
    pub async fn resolve_conflict(&self, decision: Resolution) -> SyncResult {
        let Some(wizard) = self.wizard.write().take() else {
            return SyncResult::Error("no conflict pending".into());
        };

        match decision {
            Resolution::UseServer => {
                apply(&wizard.remote, &self.store);
                info!("conflict resolved: server state applied locally");
                // A normal upload aligns the timestamps.
                self.sync_now().await
            }
            Resolution::KeepThisDevice => {
                info!("conflict resolved: forcing local state to server");
                if self.in_flight.swap(true, Ordering::SeqCst) {
                    return SyncResult::Busy;
                }
                let result = self.run_upload(true).await;
                self.in_flight.store(false, Ordering::SeqCst);
                result
            }
        }
    }

    // ---- Download / delete ---------------------------------------------------

    /// GET the remote envelope and apply it. A 404 is an empty remote and
    /// leaves local state alone.
    pub async fn download_and_apply(&self) -> SyncResult {
        let Some(user_id) = self.store.get_str(KEY_USER_ID) else {
            return SyncResult::Unauthenticated;
        };

        for attempt in 0..2 {
            let Some(access) = self.store.get_str(KEY_ACCESS_TOKEN) else {
                return SyncResult::Unauthenticated;
            };
            let outcome = match self.api.download(&access, &user_id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.set_status(SyncStatus::Error, Some(format!("download failed: {e}")));
                    return SyncResult::Error(format!("download failed: {e}"));
                }
            };
            match outcome {
                DownloadOutcome::Found(record) => {
                    let plaintext = match self.decrypt_payload(&record.encrypted_data) {
                        Ok(p) => p,
                        Err(e) => {
                            self.set_status(SyncStatus::Error, Some(e.to_string()));
                            return SyncResult::Error(e.to_string());
                        }
                    };
                    let Some(remote) =
                        serde_json::from_str::<Value>(&plaintext).ok().as_ref().and_then(promote)
                    else {
                        self.set_status(SyncStatus::Error, Some("remote envelope unreadable".into()));
                        return SyncResult::Error("remote envelope unreadable".into());
                    };
                    apply(&remote, &self.store);
                    *self.last_server_hash.write() = Some(content_hash(&remote));
                    self.store.set(KEY_LAST_SYNC, json!(record.timestamp));
                    self.set_status(SyncStatus::Synced, None);
                    return SyncResult::Synced {
                        timestamp: record.timestamp,
                    };
                }
                DownloadOutcome::NotFound => {
                    debug!("no remote envelope — keeping local state");
                    return SyncResult::Skipped;
                }
                DownloadOutcome::Unauthorized => {
                    if attempt == 0 && self.refresh_once().await {
                        continue;
                    }
                    return SyncResult::Unauthenticated;
                }
                DownloadOutcome::Failed { status } => {
                    self.set_status(SyncStatus::Error, Some(format!("server error {status}")));
                    return SyncResult::Error(format!("server error {status}"));
                }
            }
        }
        SyncResult::Unauthenticated
    }

    /// DELETE the remote record. Local data is retained; only `lastSyncAt`
    /// is cleared.
    pub async fn delete_remote(&self) -> SyncResult {
        let Some(user_id) = self.store.get_str(KEY_USER_ID) else {
            return SyncResult::Unauthenticated;
        };
        let Some(access) = self.store.get_str(KEY_ACCESS_TOKEN) else {
            return SyncResult::Unauthenticated;
        };
        match self.api.delete(&access, &user_id).await {
            Ok(true) => {
                self.store.remove(KEY_LAST_SYNC);
                *self.last_server_hash.write() = None;
                SyncResult::Synced { timestamp: 0 }
            }
            Ok(false) => SyncResult::Unauthenticated,
            Err(e) => SyncResult::Error(format!("delete failed: {e}")),
        }
    }
}

impl<A: SyncApi + 'static> SyncClient<A> {
    /// Consume config-store change events: debounce, drop superseded
    /// generations, and defer (not queue) when a sync is already running.
    pub fn spawn_change_listener(self: Arc<Self>, mut rx: UnboundedReceiver<String>) {
        let client = self;
        tokio::spawn(async move {
            while let Some(key) = rx.recv().await {
                if !is_synced_key(&key) {
                    continue;
                }
                let generation = client.change_generation.fetch_add(1, Ordering::SeqCst) + 1;
                let client = client.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(client.config.debounce).await;
                    // A newer change supersedes this debounce window.
                    if client.change_generation.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    loop {
                        match client.sync_now().await {
                            SyncResult::Busy => {
                                tokio::time::sleep(client.config.busy_retry_delay).await;
                                if client.change_generation.load(Ordering::SeqCst) != generation {
                                    return;
                                }
                            }
                            _ => return,
                        }
                    }
                });
            }
        });
    }

    /// Periodic background sync while enabled.
    pub fn spawn_auto_sync(self: Arc<Self>) {
        let client = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(client.config.auto_sync_interval);
            ticker.tick().await; // skip the immediate first tick
            loop {
                ticker.tick().await;
                if client.enabled() {
                    let _ = client.sync_now().await;
                }
            }
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicI64;

    /// In-memory service implementing the same upload algorithm as the edge
    /// tier: conflict on older timestamps unless forced, server clock on
    /// forced stores. `conflict_once` simulates another device having won a
    /// race, without depending on wall-clock ordering.
    #[derive(Default)]
    struct MockApi {
        record: Mutex<Option<ServerRecord>>,
        server_now: AtomicI64,
        reject_access: AtomicBool,
        refresh_ok: AtomicBool,
        conflict_once: AtomicBool,
        uploads: AtomicU64,
    }

    impl MockApi {
        fn with_clock(now: i64) -> Self {
            let api = Self::default();
            api.server_now.store(now, Ordering::SeqCst);
            api.refresh_ok.store(true, Ordering::SeqCst);
            api
        }
    }

    impl SyncApi for Arc<MockApi> {
        async fn register(&self, _user_id: &str, _password: &str) -> Result<()> {
            Ok(())
        }
        async fn login(&self, _user_id: &str, _password: &str) -> Result<Option<TokenPair>> {
            Ok(Some(TokenPair {
                access_token: "access".into(),
                refresh_token: "refresh".into(),
                access_expires_at: i64::MAX,
                refresh_expires_at: i64::MAX,
            }))
        }
        async fn refresh(&self, _refresh_token: &str) -> Result<Option<TokenPair>> {
            if self.refresh_ok.load(Ordering::SeqCst) {
                self.reject_access.store(false, Ordering::SeqCst);
                Ok(Some(TokenPair {
                    access_token: "access-2".into(),
                    refresh_token: "refresh-2".into(),
                    access_expires_at: i64::MAX,
                    refresh_expires_at: i64::MAX,
                }))
            } else {
                Ok(None)
            }
        }
        async fn upload(&self, _access: &str, request: &UploadRequest) -> Result<UploadOutcome> {
            if self.reject_access.load(Ordering::SeqCst) {
                return Ok(UploadOutcome::Unauthorized);
            }
            self.uploads.fetch_add(1, Ordering::SeqCst);
            let mut record = self.record.lock();
            if let Some(existing) = record.as_ref() {
                let raced = self.conflict_once.swap(false, Ordering::SeqCst);
                if (existing.timestamp > request.timestamp || raced) && !request.force {
                    return Ok(UploadOutcome::Conflict {
                        server: existing.clone(),
                    });
                }
            }
            let stored_timestamp = if request.force {
                self.server_now.load(Ordering::SeqCst)
            } else {
                request.timestamp
            };
            *record = Some(ServerRecord {
                encrypted_data: request.encrypted_data.clone(),
                device_id: Some(request.device_id.clone()),
                timestamp: stored_timestamp,
                version: request.version,
            });
            Ok(UploadOutcome::Accepted {
                timestamp: stored_timestamp,
            })
        }
        async fn download(&self, _access: &str, _user_id: &str) -> Result<DownloadOutcome> {
            Ok(match self.record.lock().clone() {
                Some(record) => DownloadOutcome::Found(record),
                None => DownloadOutcome::NotFound,
            })
        }
        async fn delete(&self, _access: &str, _user_id: &str) -> Result<bool> {
            *self.record.lock() = None;
            Ok(true)
        }
    }

    async fn logged_in_client(api: Arc<MockApi>) -> SyncClient<Arc<MockApi>> {
        let store = Arc::new(ConfigStore::in_memory());
        let client = SyncClient::new(store, api, SyncClientConfig::default());
        client.enable();
        assert!(client.login("alice", "hunter2").await.unwrap());
        client.set_passphrase("vault pass", false);
        client
    }

    #[tokio::test]
    async fn sync_disabled_without_activation() {
        let api = Arc::new(MockApi::with_clock(0));
        let store = Arc::new(ConfigStore::in_memory());
        let client = SyncClient::new(store, api, SyncClientConfig::default());
        assert_eq!(client.sync_now().await, SyncResult::Disabled);
        assert_eq!(client.snapshot().status, SyncStatus::Disabled);
    }

    #[tokio::test]
    async fn upload_roundtrip_records_server_timestamp() {
        let api = Arc::new(MockApi::with_clock(0));
        let client = logged_in_client(api.clone()).await;
        client.store.set("goal_target_pct_g1", json!(25.0));

        let result = client.sync_now().await;
        let SyncResult::Synced { timestamp } = result else {
            panic!("expected synced, got {result:?}");
        };
        assert_eq!(client.store.get_i64(KEY_LAST_SYNC), Some(timestamp));
        assert_eq!(client.snapshot().status, SyncStatus::Synced);
        assert!(api.record.lock().is_some());
    }

    #[tokio::test]
    async fn identical_payload_is_skipped_by_content_hash() {
        let api = Arc::new(MockApi::with_clock(0));
        let client = logged_in_client(api.clone()).await;
        client.store.set("goal_target_pct_g1", json!(25.0));

        assert!(matches!(client.sync_now().await, SyncResult::Synced { .. }));
        assert_eq!(client.sync_now().await, SyncResult::Skipped);
        assert_eq!(api.uploads.load(Ordering::SeqCst), 1);

        // A real change uploads again.
        client.store.set("goal_target_pct_g1", json!(30.0));
        assert!(matches!(client.sync_now().await, SyncResult::Synced { .. }));
        assert_eq!(api.uploads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn conflict_keep_this_device_adopts_server_clock() {
        let server_now = 9_999_999_999_999;
        let api = Arc::new(MockApi::with_clock(server_now));
        let client = logged_in_client(api.clone()).await;
        client.store.set("goal_target_pct_g1", json!(25.0));

        // Another device won the race.
        let other_envelope = {
            let other_store = ConfigStore::in_memory();
            other_store.set("goal_target_pct_g1", json!(70.0));
            collect(&other_store, 1)
        };
        let other_plaintext = serde_json::to_string(&other_envelope).unwrap();
        *api.record.lock() = Some(ServerRecord {
            encrypted_data: crypto::encrypt(&other_plaintext, "vault pass"),
            device_id: Some("other".into()),
            timestamp: 2_000,
            version: 2,
        });
        api.conflict_once.store(true, Ordering::SeqCst);

        assert_eq!(client.sync_now().await, SyncResult::Conflict);
        assert_eq!(client.snapshot().status, SyncStatus::Conflict);
        assert!(client.with_wizard(|w| w.step()).is_some());

        let result = client.resolve_conflict(Resolution::KeepThisDevice).await;
        let SyncResult::Synced { timestamp } = result else {
            panic!("expected synced, got {result:?}");
        };
        // The forced store used the server clock, and the client adopted it.
        assert_eq!(timestamp, server_now);
        assert_eq!(client.store.get_i64(KEY_LAST_SYNC), Some(server_now));
        // Local value survived.
        assert_eq!(client.store.get_f64("goal_target_pct_g1"), Some(25.0));
    }

    #[tokio::test]
    async fn conflict_use_server_applies_remote_then_uploads() {
        let api = Arc::new(MockApi::with_clock(5_000_000_000_000));
        let client = logged_in_client(api.clone()).await;
        client.store.set("goal_target_pct_g1", json!(25.0));

        let remote_envelope = {
            let other_store = ConfigStore::in_memory();
            other_store.set("goal_target_pct_g1", json!(70.0));
            other_store.set("fsm_target_F9", json!(10.0));
            collect(&other_store, 1)
        };
        let plaintext = serde_json::to_string(&remote_envelope).unwrap();
        *api.record.lock() = Some(ServerRecord {
            encrypted_data: crypto::encrypt(&plaintext, "vault pass"),
            device_id: Some("other".into()),
            timestamp: 2_000,
            version: 2,
        });
        api.conflict_once.store(true, Ordering::SeqCst);

        assert_eq!(client.sync_now().await, SyncResult::Conflict);
        let result = client.resolve_conflict(Resolution::UseServer).await;
        assert!(matches!(result, SyncResult::Synced { .. }));

        assert_eq!(client.store.get_f64("goal_target_pct_g1"), Some(70.0));
        assert_eq!(client.store.get_f64("fsm_target_F9"), Some(10.0));
        assert_eq!(client.snapshot().status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn wrong_key_on_conflict_blocks_apply() {
        let api = Arc::new(MockApi::with_clock(5_000_000_000_000));
        let client = logged_in_client(api.clone()).await;
        client.store.set("goal_target_pct_g1", json!(25.0));

        *api.record.lock() = Some(ServerRecord {
            encrypted_data: crypto::encrypt("{}", "a different passphrase"),
            device_id: None,
            timestamp: 2_000,
            version: 2,
        });
        api.conflict_once.store(true, Ordering::SeqCst);

        let result = client.sync_now().await;
        assert_eq!(result, SyncResult::Error("WRONG_KEY".into()));
        assert_eq!(client.snapshot().status, SyncStatus::Error);
        // Local plaintext untouched.
        assert_eq!(client.store.get_f64("goal_target_pct_g1"), Some(25.0));
    }

    #[tokio::test]
    async fn unauthorized_refreshes_once_then_retries() {
        let api = Arc::new(MockApi::with_clock(0));
        api.reject_access.store(true, Ordering::SeqCst);
        let client = logged_in_client(api.clone()).await;
        client.store.set("goal_target_pct_g1", json!(25.0));

        assert!(matches!(client.sync_now().await, SyncResult::Synced { .. }));
        assert_eq!(client.store.get_str(KEY_ACCESS_TOKEN).as_deref(), Some("access-2"));
    }

    #[tokio::test]
    async fn refresh_failure_goes_unauthenticated() {
        let api = Arc::new(MockApi::with_clock(0));
        api.reject_access.store(true, Ordering::SeqCst);
        api.refresh_ok.store(false, Ordering::SeqCst);
        let client = logged_in_client(api.clone()).await;
        client.store.set("goal_target_pct_g1", json!(25.0));

        assert_eq!(client.sync_now().await, SyncResult::Unauthenticated);
        assert_eq!(client.snapshot().status, SyncStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn download_not_found_keeps_local_state() {
        let api = Arc::new(MockApi::with_clock(0));
        let client = logged_in_client(api.clone()).await;
        client.store.set("goal_target_pct_g1", json!(25.0));

        assert_eq!(client.download_and_apply().await, SyncResult::Skipped);
        assert_eq!(client.store.get_f64("goal_target_pct_g1"), Some(25.0));
    }

    #[tokio::test]
    async fn delete_clears_last_sync_but_retains_local_data() {
        let api = Arc::new(MockApi::with_clock(0));
        let client = logged_in_client(api.clone()).await;
        client.store.set("goal_target_pct_g1", json!(25.0));
        assert!(matches!(client.sync_now().await, SyncResult::Synced { .. }));
        assert!(client.store.get_i64(KEY_LAST_SYNC).is_some());

        assert!(matches!(client.delete_remote().await, SyncResult::Synced { .. }));
        assert!(client.store.get_i64(KEY_LAST_SYNC).is_none());
        assert_eq!(client.store.get_f64("goal_target_pct_g1"), Some(25.0));
        assert!(api.record.lock().is_none());
    }

    #[tokio::test]
    async fn cancel_conflict_leaves_local_untouched() {
        let api = Arc::new(MockApi::with_clock(0));
        let client = logged_in_client(api.clone()).await;
        client.store.set("goal_target_pct_g1", json!(25.0));

        let remote = collect(&ConfigStore::in_memory(), 1);
        let plaintext = serde_json::to_string(&remote).unwrap();
        *api.record.lock() = Some(ServerRecord {
            encrypted_data: crypto::encrypt(&plaintext, "vault pass"),
            device_id: None,
            timestamp: 2_000,
            version: 2,
        });
        api.conflict_once.store(true, Ordering::SeqCst);

        assert_eq!(client.sync_now().await, SyncResult::Conflict);
        client.cancel_conflict();
        assert!(client.with_wizard(|w| w.step()).is_none());
        assert_eq!(client.store.get_f64("goal_target_pct_g1"), Some(25.0));
    }

    #[tokio::test]
    async fn device_id_is_stable() {
        let api = Arc::new(MockApi::with_clock(0));
        let client = logged_in_client(api).await;
        let id = client.device_id();
        assert_eq!(client.device_id(), id);
    }

    /// Client with fast scheduling knobs for the background-loop tests.
    async fn scheduled_client(
        api: Arc<MockApi>,
        config: SyncClientConfig,
    ) -> (Arc<ConfigStore>, Arc<SyncClient<Arc<MockApi>>>) {
        let store = Arc::new(ConfigStore::in_memory());
        let client = Arc::new(SyncClient::new(store.clone(), api, config));
        client.enable();
        assert!(client.login("alice", "hunter2").await.unwrap());
        client.set_passphrase("vault pass", false);
        (store, client)
    }

    #[tokio::test(start_paused = true)]
    async fn change_listener_debounces_and_supersedes_generations() {
        let api = Arc::new(MockApi::with_clock(0));
        let (store, client) = scheduled_client(
            api.clone(),
            SyncClientConfig {
                debounce: Duration::from_millis(200),
                busy_retry_delay: Duration::from_millis(20),
                auto_sync_interval: Duration::from_secs(3600),
            },
        )
        .await;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        store.set_change_listener(tx);
        client.clone().spawn_change_listener(rx);

        // Two edits inside one debounce window: the first generation is
        // superseded and only one upload goes out, carrying the final value.
        store.set("goal_target_pct_g1", json!(25.0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.set("goal_target_pct_g1", json!(30.0));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(api.uploads.load(Ordering::SeqCst), 1);
        assert!(store.get_i64(KEY_LAST_SYNC).is_some());
        let uploaded = client
            .decrypt_payload(&api.record.lock().as_ref().unwrap().encrypted_data)
            .unwrap();
        assert!(uploaded.contains("30.0"));

        // Keys outside the synced namespace never trigger a sync.
        store.set("api_cached_payload", json!({ "ignored": true }));
        store.set("gpv_performance_g1", json!({ "fetchedAt": 0 }));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(api.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_sync_skips_the_immediate_tick_then_runs_on_interval() {
        let api = Arc::new(MockApi::with_clock(0));
        let (store, client) = scheduled_client(
            api.clone(),
            SyncClientConfig {
                debounce: Duration::from_secs(3600),
                busy_retry_delay: Duration::from_secs(3600),
                auto_sync_interval: Duration::from_millis(100),
            },
        )
        .await;
        store.set("goal_target_pct_g1", json!(25.0));

        client.clone().spawn_auto_sync();

        // The interval's immediate first tick is consumed without syncing.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(api.uploads.load(Ordering::SeqCst), 0);

        // The first real tick uploads; later ticks are content-hash skips.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(api.uploads.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(api.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remembered_key_is_derived_material_not_passphrase() {
        let api = Arc::new(MockApi::with_clock(0));
        let store = Arc::new(ConfigStore::in_memory());
        let client = SyncClient::new(store.clone(), api, SyncClientConfig::default());
        client.set_passphrase("super secret phrase", true);

        let persisted = store.get_str(KEY_MASTER_KEY).unwrap();
        assert!(!persisted.contains("super secret phrase"));
        assert!(MasterKey::from_hex(&persisted).is_some());
        assert_eq!(store.get_bool(KEY_REMEMBER_KEY), Some(true));

        // A fresh client with only the remembered key can still round-trip.
        *client.passphrase.write() = None;
        let encrypted = client.encrypt_payload("payload").unwrap();
        assert_eq!(client.decrypt_payload(&encrypted).unwrap(), "payload");
    }
}
