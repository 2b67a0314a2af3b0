use axum::{http::StatusCode, response::IntoResponse};
use courier_types::JobError;
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type shared by the ingress surface and the engine.
///
/// Validation and store errors surface synchronously to callers; everything
/// that happens after a job is enqueued is absorbed into audit, metrics and
/// the DLQ and never becomes an `AppError` on the hot path.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Request validation =====
    #[error("validation error: {0}")]
    Validation(String),

    // ===== Authentication =====
    #[error("authentication error: {0}")]
    Auth(String),

    #[error("rate limit exceeded: {0}")]
    TooManyRequests(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    // ===== Queue store =====
    #[error("queue store error: {0}")]
    Store(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // ===== Serialization =====
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Configuration =====
    #[error("configuration error: {0}")]
    Config(String),

    // ===== Internal =====
    #[error("internal server error: {0}")]
    Internal(String),

    #[error("unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl AppError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Store(_) | AppError::Redis(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for programmatic handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Auth(_) => "AUTH_ERROR",
            AppError::TooManyRequests(_) => "RATE_LIMIT_EXCEEDED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Store(_) => "QUEUE_STORE_ERROR",
            AppError::Redis(_) => "REDIS_ERROR",
            AppError::Json(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// User-facing message without internal details.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(msg) => format!("Validation error: {}", msg),
            AppError::Auth(msg) => format!("Authentication failed: {}", msg),
            AppError::TooManyRequests(msg) => format!("Rate limit exceeded: {}", msg),
            AppError::NotFound(msg) => format!("Not found: {}", msg),
            AppError::Store(_) | AppError::Redis(_) => "Queue store unavailable".to_string(),
            AppError::Config(msg) => format!("Configuration error: {}", msg),
            _ => "Internal server error".to_string(),
        }
    }

    /// Log this error at a level appropriate to its class.
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "Server error occurred"
            );
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(
                error = %self,
                error_code = %code,
                "Authentication failed"
            );
        } else {
            tracing::debug!(
                error = %self,
                error_code = %code,
                "Client error occurred"
            );
        }
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    /// Create an authentication error.
    pub fn auth(msg: impl Into<String>) -> Self {
        AppError::Auth(msg.into())
    }

    /// Create a queue store error.
    pub fn store(msg: impl Into<String>) -> Self {
        AppError::Store(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        AppError::Config(msg.into())
    }

    /// Create an internal server error.
    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();
        let error_code = self.error_code();
        let user_message = self.user_message();

        let response_body = if status.is_server_error() {
            // Never expose internal details to the client
            json!({
                "error": "Internal server error",
                "error_code": error_code,
                "status": status.as_u16(),
            })
        } else {
            json!({
                "error": user_message,
                "error_code": error_code,
                "status": status.as_u16(),
            })
        };

        (status, axum::Json(response_body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let err = AppError::validation("recipients must not be empty");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn store_errors_map_to_service_unavailable() {
        let err = AppError::store("connection refused");
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn job_error_converts_to_validation() {
        let err: AppError = courier_types::JobError::NoRecipients.into();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn server_error_message_is_generic() {
        let err = AppError::internal("secret detail");
        assert_eq!(err.user_message(), "Internal server error");
    }
}
