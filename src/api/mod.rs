use crate::config::Config;
use crate::services::dice_service::DiceService;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::{Router, middleware::from_fn_with_state, routing::get};
use std::time::Duration;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub mod dice;
pub mod health;
pub mod middleware;
pub mod schemas;

pub use middleware::{HookChain, RequestHook, RequestInfo};

#[derive(Clone, Debug)]
pub struct AppState {
    pub dice_service: DiceService,
}

#[derive(Debug)]
pub struct ServiceContainer {
    pub dice_service: DiceService,
}

impl ServiceContainer {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self { dice_service: DiceService::new(config.upstream.clone()) }
    }
}

/// Configures and returns the application router.
pub fn app_router(config: &Config, services: ServiceContainer, hooks: HookChain) -> Router {
    let request_timeout = Duration::from_secs(config.server.request_timeout_secs);

    let state = AppState { dice_service: services.dice_service };

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/dice", get(dice::roll_dice))
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout))
        .layer(from_fn_with_state(hooks, middleware::run_hooks))
        .layer(PropagateRequestIdLayer::new(middleware::REQUEST_ID_HEADER.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .extensions()
                        .get::<tower_http::request_id::RequestId>()
                        .map(|id| id.header_value().to_str().unwrap_or_default())
                        .unwrap_or_default()
                        .to_string();

                    let span = tracing::info_span!(
                        "request",
                        "request_id" = %request_id,
                        "http.request.method" = %request.method(),
                        "url.path" = %request.uri().path(),
                        "http.response.status_code" = tracing::field::Empty,
                        "otel.kind" = "server",
                    );
                    middleware::continue_remote_trace(&span, request.headers());
                    span
                })
                .on_response(|response: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                    let status = response.status();
                    span.record("http.response.status_code", status.as_u16());

                    tracing::info!(
                        latency_ms = %latency.as_millis(),
                        status = %status.as_u16(),
                        "request completed"
                    );
                })
                .on_failure(|error, _latency, _span: &tracing::Span| {
                    tracing::error!(error = %error, "request failed");
                }),
        )
        .layer(SetRequestIdLayer::new(middleware::REQUEST_ID_HEADER.clone(), middleware::MakeRequestUuidOrHeader))
        .with_state(state)
}
