use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use log::error;
use serde_json::json;
use std::collections::BTreeMap;

use crate::db::DbError;

pub const ANALYSIS_FAILED_MESSAGE: &str = "Failed to analyze image";

pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Errors surfaced by HTTP handlers, rendered as JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("invalid fields: {0:?}")]
    Fields(FieldErrors),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("permission denied")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("image analysis failed")]
    AnalysisFailed,
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn field(name: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(name.to_string(), vec![message.into()]);
        ApiError::Fields(errors)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            ApiError::Fields(errors) => (StatusCode::BAD_REQUEST, json!(errors)),
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, json!({ "detail": message })),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                json!({ "detail": "You do not have permission to perform this action." }),
            ),
            ApiError::NotFound => (StatusCode::NOT_FOUND, json!({ "detail": "Not found." })),
            ApiError::AnalysisFailed => (
                StatusCode::BAD_GATEWAY,
                json!({ "error": ANALYSIS_FAILED_MESSAGE }),
            ),
            ApiError::Configuration(message) => {
                error!("Configuration error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Service is not configured for this request" }),
                )
            }
            ApiError::Internal(message) => {
                error!("Internal error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "detail": "Internal server error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<DieselError> for ApiError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => ApiError::NotFound,
            DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
                ApiError::Validation("Referenced record does not exist".to_string())
            }
            DieselError::DatabaseError(DatabaseErrorKind::CheckViolation, info) => {
                ApiError::Validation(format!("Constraint violated: {}", info.message()))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Query(e) => e.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diesel_not_found_maps_to_404() {
        let err: ApiError = DieselError::NotFound.into();
        assert!(matches!(err, ApiError::NotFound));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn forbidden_and_analysis_failures_use_fixed_statuses() {
        assert_eq!(ApiError::Forbidden.into_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::AnalysisFailed.into_response().status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ApiError::Configuration("missing key".to_string()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn field_errors_render_as_bad_request() {
        let response = ApiError::field("price", "Ensure this value is greater than or equal to 0.").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
