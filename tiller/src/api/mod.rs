//! HTTP control surface
//!
//! Thin bindings over the coordinator, sampler, Cabinet, SEER and failover
//! orchestrator. No business logic lives here beyond input validation and
//! error-code mapping; non-2xx responses carry a human-readable `detail`.

pub mod routes;
mod server;

pub use server::{ApiServer, AppState};

use crate::error::Error;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Error body returned on every non-2xx response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// Wrapper mapping the library error taxonomy onto HTTP status codes
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidStatement(_) => StatusCode::BAD_REQUEST,
            Error::InstanceNotFound(_) => StatusCode::NOT_FOUND,
            Error::AllocatorUnavailable(_)
            | Error::PrimaryUnavailable(_)
            | Error::NoEligibleLeader(_)
            | Error::NoHealthyQuorum(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        metrics::counter!("tiller_api_errors_total", "error" => self.0.error_type())
            .increment(1);
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorBody {
                detail: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError(Error::InvalidStatement("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(Error::InstanceNotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(Error::NoHealthyQuorum("x".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(Error::AllocatorUnavailable("x".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(Error::ExecutionError("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
