// src/server/api/error_response.rs

//! Maps [`ControllerError`] onto the HTTP status + JSON body every handler
//! in this module returns on failure.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::core::errors::ControllerError;

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

pub struct ApiError(pub ControllerError);

impl From<ControllerError> for ApiError {
    fn from(e: ControllerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self.0 {
            ControllerError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ControllerError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            ControllerError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ControllerError::Unauthorized(_) => (StatusCode::FORBIDDEN, "unauthorized"),
            ControllerError::Io(_)
            | ControllerError::Http(_)
            | ControllerError::Serialization(_)
            | ControllerError::Persistence(_)
            | ControllerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let body = ErrorBody {
            error,
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
