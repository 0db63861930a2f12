use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::errors::Error;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn unknown_credential(id: &str) -> Self {
        ApiError::NotFound(format!("unknown credential '{}'", id))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let (error_kind, message) = match self {
            ApiError::NotFound(msg) => ("not_found", msg),
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg),
            ApiError::Internal(msg) => ("internal_error", msg),
        };

        (status, Json(ErrorBody { error: error_kind, message })).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            // the machine task is gone, typically during shutdown
            Error::Internal(msg) => ApiError::ServiceUnavailable(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
