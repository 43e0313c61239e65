// src/error.rs
//! Client-visible errors. Bodies carry a kind, a message and a timestamp, never
//! collaborator details.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::query::dispatch::DispatchError;
use crate::query::routing::RoutingError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Classification(String),
    #[error("{0}")]
    MissingParameter(String),
    #[error("{0}")]
    Validation(String),
    #[error("article retrieval is temporarily unavailable")]
    Unavailable,
    #[error("an unexpected error occurred")]
    Internal,
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Classification(_) => "classification_error",
            ApiError::MissingParameter(_) => "missing_required_parameter",
            ApiError::Validation(_) => "validation_error",
            ApiError::Unavailable => "service_unavailable",
            ApiError::Internal => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Classification(_)
            | ApiError::MissingParameter(_)
            | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RoutingError> for ApiError {
    fn from(e: RoutingError) -> Self {
        match e {
            RoutingError::Classification(_) => ApiError::Classification(e.to_string()),
            RoutingError::MissingParameter { .. } => ApiError::MissingParameter(e.to_string()),
            RoutingError::InvalidParameter(msg) => ApiError::Validation(msg),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(_: DispatchError) -> Self {
        ApiError::Unavailable
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
            timestamp: Utc::now(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::model::Endpoint;

    #[test]
    fn routing_errors_map_to_bad_request() {
        let e: ApiError = RoutingError::MissingParameter {
            endpoint: Endpoint::Nearby,
            parameter: "location",
        }
        .into();
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
        assert_eq!(e.kind(), "missing_required_parameter");
        assert_eq!(e.to_string(), "nearby routing requires `location`");

        let e: ApiError = RoutingError::Classification("weather".into()).into();
        assert_eq!(e.kind(), "classification_error");
    }

    #[test]
    fn dispatch_failure_hides_collaborator_details() {
        let e: ApiError = DispatchError::PrimaryUnavailable {
            endpoint: Endpoint::Search,
            reason: "mongodb://10.0.0.3 refused".into(),
        }
        .into();
        assert_eq!(e.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!e.to_string().contains("mongodb"));
    }

    #[test]
    fn internal_error_is_a_bare_500() {
        let e = ApiError::Internal;
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.kind(), "internal_error");
        assert_eq!(e.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
