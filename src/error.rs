use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::posts::PostError;
use crate::rate_limit::StoreError;
use crate::utils::{error_codes, error_to_api_response};

/// 接口层错误，统一转换为 `ApiResponse`
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    InvalidCredentials(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    RateLimited(String),

    /// 对外只暴露通用提示，细节只写日志
    #[error("{message}")]
    Internal {
        message: &'static str,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl AppError {
    pub fn internal<E>(message: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        AppError::Internal {
            message,
            source: Some(Box::new(source)),
        }
    }

    fn status_and_code(&self) -> (StatusCode, i32) {
        match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, error_codes::AUTH_FAILED),
            AppError::InvalidCredentials(_) => (StatusCode::UNAUTHORIZED, error_codes::AUTH_FAILED),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR),
            AppError::Conflict(_) => (StatusCode::CONFLICT, error_codes::USER_EXISTS),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, error_codes::NOT_FOUND),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, error_codes::PERMISSION_DENIED),
            AppError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, error_codes::RATE_LIMIT),
            AppError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, error_codes::INTERNAL_ERROR),
        }
    }
}

impl From<PostError> for AppError {
    fn from(err: PostError) -> Self {
        match err {
            PostError::Validation(msg) => AppError::Validation(msg),
            PostError::RateLimited { message, .. } => AppError::RateLimited(message),
            PostError::NotFound => AppError::NotFound("Post not found".into()),
            PostError::NotOwner => AppError::Forbidden("You can only delete your own posts".into()),
            PostError::RateLimitStore(e) => AppError::internal("Failed to create post", e),
            PostError::Repository(e) => AppError::internal("Failed to process post", e),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::internal("Failed to get rate limits", err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if let AppError::Internal { message, source } = &self {
            tracing::error!(error = ?source, "{}", message);
        }

        (status, error_to_api_response::<()>(code, self.to_string())).into_response()
    }
}
