//! Request instrumentation.
//!
//! Every request passes through a [`HookChain`]: each [`RequestHook`] sees the
//! request before the handler runs and the final status afterwards. Hooks run
//! inside the `request` span created by the trace layer. A request whose
//! future is dropped before it produced a response is reported to `after`
//! with [`client_closed_request`].

use axum::{
    extract::{MatchedPath, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use opentelemetry::propagation::Extractor;
use opentelemetry::{
    KeyValue, global,
    metrics::{Histogram, UpDownCounter},
};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::request_id::{MakeRequestId, RequestId};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use uuid::Uuid;

pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Non-standard 499, reported when the caller went away before a response existed.
#[must_use]
pub fn client_closed_request() -> StatusCode {
    StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST)
}

/// Generates a UUID v4 request id unless the caller already sent one.
#[derive(Clone, Copy, Debug, Default)]
pub struct MakeRequestUuidOrHeader;

impl MakeRequestId for MakeRequestUuidOrHeader {
    fn make_request_id<B>(&mut self, request: &axum::http::Request<B>) -> Option<RequestId> {
        if let Some(existing) = request.headers().get(&REQUEST_ID_HEADER)
            && !existing.is_empty()
        {
            return Some(RequestId::new(existing.clone()));
        }

        HeaderValue::from_str(&Uuid::new_v4().to_string()).ok().map(RequestId::new)
    }
}

/// What a hook is allowed to see of an inbound request.
#[derive(Debug)]
pub struct RequestInfo<'a> {
    pub method: &'a Method,
    /// Route template when one matched (`/dice`), otherwise the raw path.
    pub route: &'a str,
    pub headers: &'a HeaderMap,
}

/// A before/after observer wrapped around every request.
pub trait RequestHook: Send + Sync + Debug {
    fn before(&self, _request: &RequestInfo<'_>) {}

    fn after(&self, _request: &RequestInfo<'_>, _status: StatusCode, _latency: Duration) {}
}

/// Ordered hooks. `before` runs front to back, `after` back to front.
#[derive(Clone, Debug, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn RequestHook>>,
}

impl HookChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// HTTP server metrics.
    #[must_use]
    pub fn standard() -> Self {
        Self::new().with(HttpMetricsHook::new())
    }

    #[must_use]
    pub fn with(mut self, hook: impl RequestHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn before(&self, request: &RequestInfo<'_>) {
        for hook in &self.hooks {
            hook.before(request);
        }
    }

    pub fn after(&self, request: &RequestInfo<'_>, status: StatusCode, latency: Duration) {
        for hook in self.hooks.iter().rev() {
            hook.after(request, status, latency);
        }
    }
}

/// One request between `before` and `after`. `after` fires from `Drop`, so it
/// also runs when the request future is cancelled.
struct InFlight {
    hooks: HookChain,
    method: Method,
    route: String,
    headers: HeaderMap,
    start: Instant,
    status: Option<StatusCode>,
}

impl InFlight {
    fn begin(hooks: HookChain, method: Method, route: String, headers: HeaderMap) -> Self {
        let in_flight = Self { hooks, method, route, headers, start: Instant::now(), status: None };
        in_flight.hooks.before(&in_flight.info());
        in_flight
    }

    fn info(&self) -> RequestInfo<'_> {
        RequestInfo { method: &self.method, route: &self.route, headers: &self.headers }
    }

    const fn complete(&mut self, status: StatusCode) {
        self.status = Some(status);
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let status = self.status.unwrap_or_else(|| {
            tracing::debug!(route = %self.route, "Request cancelled before a response was produced");
            client_closed_request()
        });
        self.hooks.after(&self.info(), status, self.start.elapsed());
    }
}

/// Runs the configured [`HookChain`] around the rest of the stack.
pub async fn run_hooks(State(hooks): State<HookChain>, request: Request, next: Next) -> Response {
    if hooks.is_empty() {
        return next.run(request).await;
    }

    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path().to_string(), |path| path.as_str().to_string());
    let mut in_flight = InFlight::begin(hooks, request.method().clone(), route, request.headers().clone());

    let response = next.run(request).await;
    in_flight.complete(response.status());

    response
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}

/// Parents `span` on the caller's `traceparent`/`baggage`, if any.
///
/// Must run before `span` is first entered.
pub fn continue_remote_trace(span: &tracing::Span, headers: &HeaderMap) {
    let parent = global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)));
    if let Err(e) = span.set_parent(parent) {
        tracing::debug!(error = ?e, "Failed to continue remote trace context");
    }
}

/// OpenTelemetry HTTP server duration histogram and in-flight gauge.
#[derive(Clone, Debug)]
pub struct HttpMetricsHook {
    request_duration_seconds: Histogram<f64>,
    active_requests: UpDownCounter<i64>,
}

impl HttpMetricsHook {
    #[must_use]
    pub fn new() -> Self {
        let meter = global::meter(crate::telemetry::SERVICE);
        Self {
            request_duration_seconds: meter
                .f64_histogram("http.server.request.duration")
                .with_unit("s")
                .with_description("Duration of inbound HTTP requests")
                .build(),
            active_requests: meter
                .i64_up_down_counter("http.server.active_requests")
                .with_description("Number of inbound HTTP requests in flight")
                .build(),
        }
    }

    fn base_attributes(request: &RequestInfo<'_>) -> Vec<KeyValue> {
        vec![
            KeyValue::new("http.request.method", request.method.to_string()),
            KeyValue::new("http.route", request.route.to_string()),
        ]
    }
}

impl Default for HttpMetricsHook {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestHook for HttpMetricsHook {
    fn before(&self, request: &RequestInfo<'_>) {
        self.active_requests.add(1, &Self::base_attributes(request));
    }

    fn after(&self, request: &RequestInfo<'_>, status: StatusCode, latency: Duration) {
        let attributes = Self::base_attributes(request);
        self.active_requests.add(-1, &attributes);

        let mut attributes = attributes;
        attributes.push(KeyValue::new("http.response.status_code", i64::from(status.as_u16())));
        self.request_duration_seconds.record(latency.as_secs_f64(), &attributes);
    }
}
