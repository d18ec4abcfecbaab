// HTTP and WebSocket APIs

pub mod alerts;
pub mod readings;
pub mod websocket;

pub use alerts::{create_alert_router, AlertAppState};
pub use readings::{create_readings_router, ReadingsAppState};
pub use websocket::{create_ws_router, ws_handler, WsAppState};

use crate::alert::{RuleError, StoreError};
use crate::auth::{AccessError, AuthError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

/// Error response body shared by every endpoint
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types, mapped onto the HTTP status taxonomy:
/// authentication 401, authorization 403, missing entity 404, state-machine
/// and uniqueness conflicts 409, malformed input 400.
pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    ValidationError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
        };
        let body = Json(ErrorResponse {
            error: error_message,
        });
        (status, body).into_response()
    }
}

impl From<AccessError> for ApiError {
    fn from(e: AccessError) -> Self {
        match e {
            AccessError::Auth(auth) => ApiError::from(auth),
            AccessError::PermissionDenied(cap) => {
                ApiError::Forbidden(format!("Permission {} required", cap))
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Unauthorized(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound("Alert not found".to_string()),
            StoreError::InvalidTransition { .. } | StoreError::DuplicateActiveAlert => {
                ApiError::Conflict(e.to_string())
            }
            StoreError::Validation(msg) => ApiError::ValidationError(msg),
        }
    }
}

impl From<RuleError> for ApiError {
    fn from(e: RuleError) -> Self {
        match e {
            RuleError::NotFound => ApiError::NotFound("Alert rule not found".to_string()),
            RuleError::Invalid(msg) => ApiError::ValidationError(msg),
        }
    }
}
