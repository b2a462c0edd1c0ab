use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fallback_rag_core::PipelineError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("gateway timeout: {0}")]
    GatewayTimeout(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::InvalidQuery(message) => Self::BadRequest(message),
            PipelineError::IndexUnavailable | PipelineError::Cancelled => {
                Self::ServiceUnavailable(error.to_string())
            }
            PipelineError::Timeout { .. } => Self::GatewayTimeout(error.to_string()),
            other => {
                tracing::error!(kind = other.kind(), error = %other, "unexpected pipeline failure");
                Self::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::BadRequest(message)
            | Self::ServiceUnavailable(message)
            | Self::GatewayTimeout(message)
            | Self::Internal(message) => message.clone(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
