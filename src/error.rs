use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("upstream AI service failed: {0}")]
    Upstream(String),
    #[error("upstream AI service timed out")]
    UpstreamTimeout,
    #[error("could not understand AI response: {0}")]
    MalformedResponse(String),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match self {
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServiceError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::MalformedResponse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
