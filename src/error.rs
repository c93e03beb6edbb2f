use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(#[source] reqwest::Error),
    #[error("Upstream returned {0}")]
    UpstreamStatus(StatusCode),
    #[error("Upstream timed out")]
    UpstreamTimeout,
    #[error("Internal server error")]
    Internal,
}

pub type Result<T> = std::result::Result<T, AppError>;

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::UpstreamTimeout
        } else {
            Self::UpstreamUnavailable(e)
        }
    }
}

impl AppError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::UpstreamUnavailable(_) | Self::UpstreamStatus(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::UpstreamUnavailable(e) => {
                tracing::warn!(error = %e, "Upstream unavailable");
                "Upstream unavailable".to_string()
            }
            Self::UpstreamStatus(upstream_status) => {
                tracing::warn!(upstream_status = %upstream_status.as_u16(), "Upstream returned an error status");
                format!("Upstream returned {}", upstream_status.as_u16())
            }
            Self::UpstreamTimeout => {
                tracing::warn!("Upstream timed out");
                "Upstream timed out".to_string()
            }
            Self::Internal => {
                tracing::error!("Internal server error occurred");
                "Internal server error".to_string()
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
