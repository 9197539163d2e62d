use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

/// Errors returned by HTTP handlers.
///
/// Every variant renders as a plain-text body; clients surface the text as-is.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required setting is missing
    #[error("{0} is not defined")]
    MissingConfig(&'static str),

    #[error("Failed to generate access token: {0}")]
    TokenGeneration(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingConfig(_) | AppError::TokenGeneration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        error!(status = status.as_u16(), "{self}");
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_message() {
        let err = AppError::MissingConfig("LIVEKIT_URL");
        assert_eq!(err.to_string(), "LIVEKIT_URL is not defined");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_renders_plain_text_500() {
        let response = AppError::TokenGeneration("bad secret".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
    }
}
