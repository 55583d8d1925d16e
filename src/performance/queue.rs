// =============================================================================
// Performance Queue — sequential, polite per-goal fetches
// =============================================================================
//
// A single FIFO worker processes one BFF request at a time with a
// configurable inter-request delay, so at most one performance fetch is in
// flight globally. Requests carry the interception layer's captured auth; a
// request without an authorization value is never issued. Dropping the queue
// aborts the worker, which abandons the in-flight request and discards
// pending goals.
// =============================================================================

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::cache::PerformanceCache;
use super::series::{decode_bff_performance, PerformanceSeries};
use crate::intercept::{AuthContext, AuthFallback, AuthHeaders, INTERNAL_TAG_HEADER};

/// Pluggable transport: URL + headers in, parsed JSON out (`None` on any
/// transport or HTTP failure). Production uses [`http_fetcher`]; tests
/// inject a stub.
pub type FetchFn = Arc<
    dyn Fn(String, AuthHeaders) -> Pin<Box<dyn Future<Output = Option<Value>> + Send>>
        + Send
        + Sync,
>;

/// Queue tuning knobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub base_url: String,
    pub inter_request_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_url: "https://bff.prod.silver.endowus.com/v1/performance".to_string(),
            inter_request_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Build the reqwest-backed fetcher. Outbound requests are tagged with
/// [`INTERNAL_TAG_HEADER`] so the interception layer never re-enters itself.
pub fn http_fetcher(config: &QueueConfig) -> FetchFn {
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .expect("failed to build reqwest client");

    Arc::new(move |url, headers| {
        let client = client.clone();
        Box::pin(async move {
            let mut request = client.get(&url).header(INTERNAL_TAG_HEADER, "1");
            if let Some(authorization) = &headers.authorization {
                request = request.header("authorization", authorization);
            }
            if let Some(client_id) = &headers.client_id {
                request = request.header("client-id", client_id);
            }
            if let Some(device_id) = &headers.device_id {
                request = request.header("device-id", device_id);
            }

            match request.send().await {
                Ok(resp) if resp.status().is_success() => resp.json::<Value>().await.ok(),
                Ok(resp) => {
                    warn!(url = %url, status = %resp.status(), "performance fetch rejected");
                    None
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "performance fetch failed");
                    None
                }
            }
        })
    })
}

struct FetchJob {
    goal_id: String,
    force: bool,
    respond: oneshot::Sender<Option<PerformanceSeries>>,
}

/// Process-wide performance fetch queue. Construct one at startup and pass
/// it explicitly to code that needs it.
pub struct PerformanceQueue {
    tx: mpsc::UnboundedSender<FetchJob>,
    worker: JoinHandle<()>,
}

impl PerformanceQueue {
    pub fn new(
        config: QueueConfig,
        cache: PerformanceCache,
        auth: Arc<AuthContext>,
        fallback: AuthFallback,
    ) -> Self {
        let fetcher = http_fetcher(&config);
        Self::with_fetcher(config, cache, auth, fallback, fetcher)
    }

    /// Construct with an injected transport (tests).
    pub fn with_fetcher(
        config: QueueConfig,
        cache: PerformanceCache,
        auth: Arc<AuthContext>,
        fallback: AuthFallback,
        fetcher: FetchFn,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<FetchJob>();

        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let now_ms = Utc::now().timestamp_millis();

                // Force refresh is rate limited per goal; a throttled force
                // degrades to a normal cache-first read.
                let force = job.force && cache.can_force_refresh(&job.goal_id, now_ms);

                if !force {
                    if let Some(hit) = cache.get(&job.goal_id, now_ms) {
                        debug!(goal_id = %job.goal_id, "performance cache hit");
                        let _ = job.respond.send(Some(hit));
                        continue;
                    }
                }

                let headers = auth.resolve(&fallback);
                if !headers.is_usable() {
                    warn!(goal_id = %job.goal_id, "no captured authorization — fetch skipped");
                    let _ = job.respond.send(None);
                    continue;
                }

                if force {
                    cache.record_force_refresh(&job.goal_id, now_ms);
                }

                let url = format!(
                    "{}?displayCcy=SGD&goalId={}",
                    config.base_url, job.goal_id
                );
                let result = fetcher(url, headers)
                    .await
                    .and_then(|payload| decode_bff_performance(&job.goal_id, &payload));

                match result {
                    Some(series) => {
                        cache.put(&job.goal_id, &series, Utc::now().timestamp_millis());
                        let _ = job.respond.send(Some(series));
                    }
                    None => {
                        // Cached data stays untouched on failure.
                        let _ = job.respond.send(None);
                    }
                }

                tokio::time::sleep(config.inter_request_delay).await;
            }
        });

        Self { tx, worker }
    }

    /// Fetch a goal's series, serving the cache when fresh.
    pub async fn fetch(&self, goal_id: &str) -> Option<PerformanceSeries> {
        self.request(goal_id, false).await
    }

    /// UI-initiated refresh; throttled to once per 24 h per goal.
    pub async fn force_refresh(&self, goal_id: &str) -> Option<PerformanceSeries> {
        self.request(goal_id, true).await
    }

    async fn request(&self, goal_id: &str, force: bool) -> Option<PerformanceSeries> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(FetchJob {
                goal_id: goal_id.to_string(),
                force,
                respond,
            })
            .ok()?;
        rx.await.ok().flatten()
    }
}

impl Drop for PerformanceQueue {
    fn drop(&mut self) {
        // Abort the in-flight request and drop all queued goals.
        self.worker.abort();
    }
}
