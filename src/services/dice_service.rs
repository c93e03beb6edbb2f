use crate::config::UpstreamConfig;
use crate::error::{AppError, Result};
use bytes::Bytes;
use opentelemetry::{KeyValue, global, metrics::Histogram};
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct UpstreamMetrics {
    pub request_duration_seconds: Histogram<f64>,
}

impl UpstreamMetrics {
    #[must_use]
    pub fn new() -> Self {
        let meter = global::meter(crate::telemetry::SERVICE);
        Self {
            request_duration_seconds: meter
                .f64_histogram("upstream.request.duration")
                .with_unit("s")
                .with_description("Duration of calls to the dice service")
                .build(),
        }
    }
}

impl Default for UpstreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// An outbound client owned by exactly one inbound request.
///
/// Pooling is disabled, so dropping this closes every connection it opened.
/// Redirects are not followed: a 3xx is relayed as an upstream failure.
#[derive(Debug)]
pub struct ScopedClient {
    client: reqwest::Client,
}

impl ScopedClient {
    /// # Errors
    /// Returns [`AppError::Internal`] if the TLS backend or resolver cannot be initialised.
    pub fn acquire(config: &UpstreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .pool_max_idle_per_host(0)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to build upstream client");
                AppError::Internal
            })?;

        tracing::debug!("Upstream client acquired");
        Ok(Self { client })
    }

    #[must_use]
    pub const fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Drop for ScopedClient {
    fn drop(&mut self) {
        tracing::debug!("Upstream client released");
    }
}

/// Raw upstream payload, relayed without inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roll {
    pub body: Bytes,
    pub content_type: Option<HeaderValue>,
}

#[derive(Clone, Debug)]
pub struct DiceService {
    config: UpstreamConfig,
    metrics: UpstreamMetrics,
}

impl DiceService {
    #[must_use]
    pub fn new(config: UpstreamConfig) -> Self {
        Self { config, metrics: UpstreamMetrics::new() }
    }

    #[must_use]
    pub fn upstream_url(&self) -> &str {
        &self.config.url
    }

    /// Performs one GET against the dice service and returns its body untouched.
    ///
    /// # Errors
    /// - [`AppError::UpstreamTimeout`] when the configured timeout elapses.
    /// - [`AppError::UpstreamUnavailable`] when the connection fails or the body cannot be read.
    /// - [`AppError::UpstreamStatus`] when the upstream answers with a non-success status.
    #[tracing::instrument(
        name = "upstream.roll",
        skip(self),
        fields(url.full = %self.config.url, otel.kind = "client", http.response.status_code = tracing::field::Empty),
        err(level = "debug")
    )]
    pub async fn roll(&self) -> Result<Roll> {
        let start = Instant::now();
        let res = self.fetch().await;

        let outcome = match &res {
            Ok(_) => "success",
            Err(AppError::UpstreamTimeout) => "timeout",
            Err(AppError::UpstreamStatus(_)) => "bad_status",
            Err(_) => "unavailable",
        };
        self.metrics
            .request_duration_seconds
            .record(start.elapsed().as_secs_f64(), &[KeyValue::new("outcome", outcome)]);

        res
    }

    async fn fetch(&self) -> Result<Roll> {
        let scoped = ScopedClient::acquire(&self.config)?;

        let response = scoped.client().get(&self.config.url).send().await?;
        let status = response.status();
        tracing::Span::current().record("http.response.status_code", status.as_u16());

        if !status.is_success() {
            return Err(AppError::UpstreamStatus(status));
        }

        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        let body = response.bytes().await?;

        tracing::debug!(bytes = body.len(), "Upstream roll received");
        Ok(Roll { body, content_type })
    }
}
