use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use flowgate_core::CoordinationError;
use serde_json::json;
use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<CoordinationError> for AppError {
    fn from(err: CoordinationError) -> Self {
        if err.is_unavailable() {
            tracing::warn!(error = %err, "coordination store unavailable");
            return Self::unavailable("Coordination store unavailable");
        }
        match err {
            CoordinationError::InvalidArgument(msg) => Self::bad_request(msg),
            other => {
                tracing::error!(error = %other, "coordination operation failed");
                Self::internal("Coordination operation failed")
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_store_maps_to_503() {
        let err: AppError = CoordinationError::StoreUnavailable("refused".into()).into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.message.contains("refused"));
    }

    #[test]
    fn invalid_argument_maps_to_400() {
        let err: AppError = CoordinationError::InvalidArgument("ttl must be positive".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "ttl must be positive");
    }
}
