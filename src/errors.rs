use crate::models::AppraisalStatus;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application-specific error types surfaced over HTTP.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Request conflicts with current state (a run is already active).
    Conflict(String),
    /// Error interacting with an external API.
    ExternalApiError(String),
    /// Unexpected failure, such as a handler panic.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Maps each error variant to an HTTP status code and JSON body.
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => {
                tracing::warn!("Conflict: {}", msg);
                (StatusCode::CONFLICT, msg)
            }
            AppError::ExternalApiError(msg) => {
                tracing::error!("External API error: {}", msg);
                (StatusCode::BAD_GATEWAY, format!("External service error: {}", msg))
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                return source.into_response();
            }
        };

        let body = Json(json!({
            "status": "error",
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<AppraisalError> for AppError {
    fn from(err: AppraisalError) -> Self {
        match err {
            AppraisalError::InvalidNumber(msg) => AppError::BadRequest(msg),
            other => AppError::ExternalApiError(other.to_string()),
        }
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }
}

/// Failures raised while appraising inventory.
///
/// Only [`AppraisalError::AuthenticationFailure`] ends a run; every other variant is
/// recorded against the VIN being processed and the run moves on.
#[derive(Debug, Clone, PartialEq)]
pub enum AppraisalError {
    /// Portal rejected the stored credentials.
    AuthenticationFailure(String),
    /// Portal bounced an authenticated page back to its login screen.
    SessionExpired,
    /// Expected portal responses did not arrive in time.
    Timeout { vin: String, waited_secs: u64 },
    /// Portal responses arrived without the expected valuation fields.
    MalformedResponse(String),
    /// Appraisal row could not be written.
    StoreWriteFailure(String),
    /// Non-finite or negative amounts.
    InvalidNumber(String),
    /// Inventory could not be read.
    InventoryUnavailable(String),
    /// WebDriver or page scripting failure.
    Browser(String),
}

impl AppraisalError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppraisalError::AuthenticationFailure(_))
    }

    /// Status recorded against a VIN that failed with this error.
    pub fn status(&self) -> AppraisalStatus {
        match self {
            AppraisalError::Timeout { .. } => AppraisalStatus::Timeout,
            AppraisalError::MalformedResponse(_) => AppraisalStatus::NoData,
            AppraisalError::StoreWriteFailure(_) => AppraisalStatus::StoreFailed,
            _ => AppraisalStatus::Error,
        }
    }
}

impl fmt::Display for AppraisalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppraisalError::AuthenticationFailure(msg) => {
                write!(f, "Authentication failure: {}", msg)
            }
            AppraisalError::SessionExpired => write!(f, "Portal session expired"),
            AppraisalError::Timeout { vin, waited_secs } => write!(
                f,
                "Timed out after {}s waiting for valuation of {}",
                waited_secs, vin
            ),
            AppraisalError::MalformedResponse(msg) => write!(f, "Malformed response: {}", msg),
            AppraisalError::StoreWriteFailure(msg) => write!(f, "Store write failure: {}", msg),
            AppraisalError::InvalidNumber(msg) => write!(f, "Invalid number: {}", msg),
            AppraisalError::InventoryUnavailable(msg) => {
                write!(f, "Inventory unavailable: {}", msg)
            }
            AppraisalError::Browser(msg) => write!(f, "Browser error: {}", msg),
        }
    }
}

impl std::error::Error for AppraisalError {}

impl From<fantoccini::error::CmdError> for AppraisalError {
    fn from(err: fantoccini::error::CmdError) -> Self {
        AppraisalError::Browser(err.to_string())
    }
}

impl From<fantoccini::error::NewSessionError> for AppraisalError {
    fn from(err: fantoccini::error::NewSessionError) -> Self {
        AppraisalError::Browser(format!("Failed to open WebDriver session: {}", err))
    }
}
