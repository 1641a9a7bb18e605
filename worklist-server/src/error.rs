//! HTTP error mapping

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use worklist_core::WorklistError;
use worklist_store::StoreError;

use crate::fhir_source::FhirError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Upstream FHIR server error: {0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Upstream(_) => "upstream",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "Request failed");
        }
        let body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<WorklistError> for ApiError {
    fn from(err: WorklistError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            StoreError::Conflict(_) => ApiError::Conflict(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<FhirError> for ApiError {
    fn from(err: FhirError) -> Self {
        match err {
            FhirError::InvalidQuery(_) => ApiError::BadRequest(err.to_string()),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err: ApiError = WorklistError::UnknownColumn("due".into()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err: ApiError = StoreError::not_found("Panel", "p1").into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Panel not found: p1");

        let err: ApiError = StoreError::Conflict("exists".into()).into();
        assert_eq!(err.kind(), "conflict");

        let err: ApiError = FhirError::Status {
            status: 503,
            url: "http://fhir/Task".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}
