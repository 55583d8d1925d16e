// =============================================================================
// Interception Layer — passive endpoint tap
// =============================================================================
//
// A passive observer over the host page's HTTP traffic. The tap is modelled
// as a port: production binds it to the page's fetch/XHR primitives (outside
// this crate), tests inject [`StubTap`]. Matched responses are parsed
// defensively and pushed into per-endpoint cache slots; the host page's flow
// is never broken — every failure here is logged and swallowed.
//
// Outbound requests this crate originates (performance BFF, sync service)
// carry [`INTERNAL_TAG_HEADER`] and short-circuit the observation branch, so
// the tap never re-enters itself.

pub mod auth;

pub use auth::{AuthContext, AuthFallback, AuthHeaders};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, trace};

use crate::model::{
    decode_holdings, decode_investible, decode_performance, decode_summaries, HoldingRow,
    InvestibleRecord, PerformanceRecord, SummaryRecord,
};

/// Marker header tagged onto requests this crate issues itself.
pub const INTERNAL_TAG_HEADER: &str = "x-gpv-internal";

/// Platform-A dashboard prefix where the overlay trigger is shown.
const PLATFORM_A_DASHBOARD: &str = "https://app.sg.endowus.com/dashboard";
/// Platform-B holdings page where the overlay trigger is shown.
const PLATFORM_B_HOLDINGS: &str = "https://secure.fundsupermart.com/fsmone/holdings/investments";

// =============================================================================
// Endpoint classification
// =============================================================================

/// The five observed endpoints, as tagged variants. Each has its own decoder
/// and cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    /// Platform-A `/v1/goals/performance`.
    PerformanceList,
    /// Platform-A `/v2/goals/investible`.
    Investible,
    /// Platform-A `/v1/goals`.
    GoalSummaries,
    /// Platform-A per-goal time-series BFF.
    GoalPerformanceBff,
    /// Platform-B find-holdings-with-pnl.
    FsmHoldings,
}

impl EndpointKind {
    /// Classify a URL by substring. Match order matters: the goals
    /// performance path also contains the goal-summaries substring.
    pub fn match_url(url: &str) -> Option<Self> {
        if url.contains("bff.prod.silver.endowus.com/v1/performance") {
            Some(Self::GoalPerformanceBff)
        } else if url.contains("/v1/goals/performance") {
            Some(Self::PerformanceList)
        } else if url.contains("/v2/goals/investible") {
            Some(Self::Investible)
        } else if url.contains("/fsmone/rest/holding/client/protected/find-holdings-with-pnl") {
            Some(Self::FsmHoldings)
        } else if url.contains("/v1/goals") {
            Some(Self::GoalSummaries)
        } else {
            None
        }
    }

    /// Whether this endpoint belongs to Platform A (and therefore carries
    /// auth headers worth capturing).
    pub fn is_platform_a(&self) -> bool {
        !matches!(self, Self::FsmHoldings)
    }
}

// =============================================================================
// Capture cache
// =============================================================================

/// Latest parsed payload per endpoint.
#[derive(Default)]
pub struct CaptureCache {
    slots: RwLock<HashMap<EndpointKind, Value>>,
}

impl CaptureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the slot for `kind`.
    pub fn store(&self, kind: EndpointKind, payload: Value) {
        self.slots.write().insert(kind, payload);
    }

    /// Raw payload for `kind`.
    pub fn get(&self, kind: EndpointKind) -> Option<Value> {
        self.slots.read().get(&kind).cloned()
    }

    /// Decoded performance list, if captured and well-shaped.
    pub fn performance(&self) -> Option<Vec<PerformanceRecord>> {
        self.get(EndpointKind::PerformanceList)
            .and_then(|v| decode_performance(&v))
    }

    /// Decoded investible list, if captured and well-shaped.
    pub fn investible(&self) -> Option<Vec<InvestibleRecord>> {
        self.get(EndpointKind::Investible)
            .and_then(|v| decode_investible(&v))
    }

    /// Decoded goal summaries, if captured and well-shaped.
    pub fn summaries(&self) -> Option<Vec<SummaryRecord>> {
        self.get(EndpointKind::GoalSummaries)
            .and_then(|v| decode_summaries(&v))
    }

    /// Decoded Platform-B holdings, if captured and well-shaped.
    pub fn holdings(&self) -> Option<Vec<HoldingRow>> {
        self.get(EndpointKind::FsmHoldings)
            .and_then(|v| decode_holdings(&v))
    }
}

// =============================================================================
// Tap port
// =============================================================================

/// One observed request/response pair, as delivered by the tap binding.
#[derive(Debug, Clone)]
pub struct TapEvent {
    pub url: String,
    /// Request headers, lower-cased keys.
    pub request_headers: HashMap<String, String>,
    /// Response body text (cloned before the page reads it).
    pub body: String,
}

/// Observer invoked for every event the tap sees.
pub type TapObserver = Arc<dyn Fn(TapEvent) + Send + Sync>;

/// Teardown handle returned by [`TapPort::start`]. Dropping it leaves the
/// tap running; call [`TapHandle::stop`] to detach.
pub struct TapHandle {
    active: Arc<AtomicBool>,
}

impl TapHandle {
    pub fn new(active: Arc<AtomicBool>) -> Self {
        Self { active }
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Port over the host page's HTTP primitives. Production supplies a binding
/// to fetch/XHR; tests supply [`StubTap`].
pub trait TapPort {
    fn start(&self, observer: TapObserver) -> TapHandle;
}

/// Test double: records the observer on `start` and replays whatever events
/// the test emits.
#[derive(Default)]
pub struct StubTap {
    observer: RwLock<Option<TapObserver>>,
    active: Arc<AtomicBool>,
}

impl StubTap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to the installed observer, honouring teardown.
    pub fn emit(&self, event: TapEvent) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        if let Some(observer) = self.observer.read().as_ref() {
            observer(event);
        }
    }
}

impl TapPort for StubTap {
    fn start(&self, observer: TapObserver) -> TapHandle {
        *self.observer.write() = Some(observer);
        self.active.store(true, Ordering::SeqCst);
        TapHandle::new(self.active.clone())
    }
}

// =============================================================================
// Interceptor
// =============================================================================

/// Binds the tap to the capture cache and auth context.
pub struct Interceptor {
    pub cache: Arc<CaptureCache>,
    pub auth: Arc<AuthContext>,
}

impl Interceptor {
    pub fn new(cache: Arc<CaptureCache>, auth: Arc<AuthContext>) -> Self {
        Self { cache, auth }
    }

    /// Build the observer closure to hand to a [`TapPort`].
    pub fn observer(&self) -> TapObserver {
        let cache = self.cache.clone();
        let auth = self.auth.clone();
        Arc::new(move |event| observe_event(&cache, &auth, &event))
    }

    /// Process one observed event. Never panics; every failure is swallowed.
    pub fn observe(&self, event: &TapEvent) {
        observe_event(&self.cache, &self.auth, event);
    }
}

/// Shared observation path for the bound closure and direct calls.
fn observe_event(cache: &CaptureCache, auth: &AuthContext, event: &TapEvent) {
    // Re-entrancy guard: skip requests this crate issued itself.
    if event.request_headers.contains_key(INTERNAL_TAG_HEADER) {
        trace!(url = %event.url, "skipping self-originated request");
        return;
    }

    let Some(kind) = EndpointKind::match_url(&event.url) else {
        return;
    };

    if kind.is_platform_a() {
        auth.merge(AuthHeaders::from_request_headers(&event.request_headers));
    }

    match serde_json::from_str::<Value>(&event.body) {
        Ok(payload) => {
            debug!(url = %event.url, ?kind, "captured endpoint payload");
            cache.store(kind, payload);
        }
        Err(e) => {
            debug!(url = %event.url, ?kind, error = %e, "invalid JSON ignored");
        }
    }
}

// =============================================================================
// Overlay trigger rules
// =============================================================================

/// Whether the overlay trigger button is shown for the current page URL.
pub fn should_show_trigger(url: &str) -> bool {
    url.starts_with(PLATFORM_A_DASHBOARD) || url.starts_with(PLATFORM_B_HOLDINGS)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(url: &str, body: &str) -> TapEvent {
        TapEvent {
            url: url.to_string(),
            request_headers: HashMap::new(),
            body: body.to_string(),
        }
    }

    // ---- EndpointKind::match_url -------------------------------------------

    #[test]
    fn url_classification() {
        assert_eq!(
            EndpointKind::match_url("https://x.endowus.com/api/v1/goals/performance?x=1"),
            Some(EndpointKind::PerformanceList)
        );
        assert_eq!(
            EndpointKind::match_url("https://x.endowus.com/api/v2/goals/investible"),
            Some(EndpointKind::Investible)
        );
        assert_eq!(
            EndpointKind::match_url("https://x.endowus.com/api/v1/goals"),
            Some(EndpointKind::GoalSummaries)
        );
        assert_eq!(
            EndpointKind::match_url(
                "https://bff.prod.silver.endowus.com/v1/performance?displayCcy=SGD&goalId=g1"
            ),
            Some(EndpointKind::GoalPerformanceBff)
        );
        assert_eq!(
            EndpointKind::match_url(
                "https://secure.fundsupermart.com/fsmone/rest/holding/client/protected/find-holdings-with-pnl"
            ),
            Some(EndpointKind::FsmHoldings)
        );
        assert_eq!(EndpointKind::match_url("https://example.com/other"), None);
    }

    // ---- Interceptor -------------------------------------------------------

    #[test]
    fn observe_captures_valid_payloads() {
        let interceptor = Arc::new(Interceptor::new(
            Arc::new(CaptureCache::new()),
            Arc::new(AuthContext::new()),
        ));
        interceptor.observe(&event(
            "https://x.endowus.com/api/v1/goals/performance",
            r#"[{"goalId":"g1"}]"#,
        ));
        assert_eq!(interceptor.cache.performance().unwrap().len(), 1);
    }

    #[test]
    fn observe_swallows_invalid_json() {
        let interceptor = Arc::new(Interceptor::new(
            Arc::new(CaptureCache::new()),
            Arc::new(AuthContext::new()),
        ));
        interceptor.observe(&event(
            "https://x.endowus.com/api/v1/goals/performance",
            "<html>not json</html>",
        ));
        assert!(interceptor
            .cache
            .get(EndpointKind::PerformanceList)
            .is_none());
    }

    #[test]
    fn observe_skips_internally_tagged_requests() {
        let interceptor = Arc::new(Interceptor::new(
            Arc::new(CaptureCache::new()),
            Arc::new(AuthContext::new()),
        ));
        let mut tagged = event(
            "https://bff.prod.silver.endowus.com/v1/performance?goalId=g1",
            r#"{"timeSeries":[]}"#,
        );
        tagged
            .request_headers
            .insert(INTERNAL_TAG_HEADER.to_string(), "1".to_string());
        interceptor.observe(&tagged);
        assert!(interceptor
            .cache
            .get(EndpointKind::GoalPerformanceBff)
            .is_none());
    }

    #[test]
    fn observe_captures_auth_headers_from_platform_a() {
        let interceptor = Arc::new(Interceptor::new(
            Arc::new(CaptureCache::new()),
            Arc::new(AuthContext::new()),
        ));
        let mut ev = event("https://x.endowus.com/api/v1/goals", "[]");
        ev.request_headers
            .insert("authorization".to_string(), "Bearer tok".to_string());
        ev.request_headers
            .insert("client-id".to_string(), "cid".to_string());
        interceptor.observe(&ev);

        let captured = interceptor.auth.get();
        assert_eq!(captured.authorization.as_deref(), Some("Bearer tok"));
        assert_eq!(captured.client_id.as_deref(), Some("cid"));
        assert!(captured.device_id.is_none());
    }

    // ---- StubTap -----------------------------------------------------------

    #[test]
    fn stub_tap_delivers_until_stopped() {
        let tap = StubTap::new();
        let interceptor = Arc::new(Interceptor::new(
            Arc::new(CaptureCache::new()),
            Arc::new(AuthContext::new()),
        ));
        let handle = tap.start(interceptor.observer());

        tap.emit(event("https://x.endowus.com/api/v1/goals", "[]"));
        assert!(interceptor.cache.get(EndpointKind::GoalSummaries).is_some());

        handle.stop();
        tap.emit(event(
            "https://x.endowus.com/api/v2/goals/investible",
            "[]",
        ));
        assert!(interceptor.cache.get(EndpointKind::Investible).is_none());
    }

    // ---- trigger rules -----------------------------------------------------

    #[test]
    fn trigger_only_on_known_pages() {
        assert!(should_show_trigger("https://app.sg.endowus.com/dashboard"));
        assert!(should_show_trigger(
            "https://secure.fundsupermart.com/fsmone/holdings/investments"
        ));
        assert!(!should_show_trigger("https://app.sg.endowus.com/settings"));
        assert!(!should_show_trigger("https://example.com/"));
    }

    #[test]
    fn capture_cache_round_trips_holdings() {
        let cache = CaptureCache::new();
        cache.store(
            EndpointKind::FsmHoldings,
            json!({ "data": [{ "holdings": [{ "code": "F1", "productType": "FUND" }] }] }),
        );
        assert_eq!(cache.holdings().unwrap().len(), 1);
    }
}
