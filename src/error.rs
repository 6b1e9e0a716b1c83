//! API error type shared by every handler.
//!
//! Every failure renders as `{"success": false, "message": ...}`. Infrastructure
//! errors (database, Redis) are logged with their cause and reach the client
//! only as a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::services::seat_lock::LockError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Gone(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::Database(_) | ApiError::Redis(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn client_message(&self) -> String {
        match self {
            ApiError::Database(_) | ApiError::Redis(_) | ApiError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound(format!("{} not found", what))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        let body = ErrorBody {
            success: false,
            message: self.client_message(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(msg) => msg.to_string(),
                    None => format!("{} is invalid", field),
                })
            })
            .collect();
        messages.sort();
        ApiError::Validation(messages.join("; "))
    }
}

impl From<LockError> for ApiError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Conflict { .. } | LockError::NotHeld { .. } => {
                ApiError::Conflict(err.to_string())
            }
            LockError::Store(e) => ApiError::Redis(e),
        }
    }
}

impl From<bcrypt::BcryptError> for ApiError {
    fn from(err: bcrypt::BcryptError) -> Self {
        ApiError::Internal(format!("password hashing failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Signup {
        #[validate(email(message = "email must be valid"))]
        email: String,
        #[validate(length(min = 6, message = "password must be at least 6 characters"))]
        password: String,
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::Gone("x".into()).status(), StatusCode::GONE);
        assert_eq!(ApiError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_details_are_hidden() {
        let err = ApiError::Internal("connection refused to 10.0.0.3".into());
        assert_eq!(err.client_message(), "Internal server error");
        let err = ApiError::NotFound("Showtime not found".into());
        assert_eq!(err.client_message(), "Showtime not found");
    }

    #[test]
    fn validation_messages_are_joined() {
        let err: ApiError = Signup {
            email: "nope".into(),
            password: "123".into(),
        }
        .validate()
        .unwrap_err()
        .into();
        assert_eq!(
            err.to_string(),
            "email must be valid; password must be at least 6 characters"
        );
    }

    #[test]
    fn lock_conflict_maps_to_409() {
        let err: ApiError = LockError::Conflict {
            seats: vec!["A1".into(), "A2".into()],
        }
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert!(err.to_string().contains("A1, A2"));
    }

    #[tokio::test]
    async fn response_body_shape() {
        let response = ApiError::Forbidden("Admins only".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({"success": false, "message": "Admins only"}));
    }
}
