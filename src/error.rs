//! Gateway-level errors and the wire error envelope.
//!
//! Every JSON endpoint answers failures with the same envelope:
//! `{"error":{"message":"…","type":"error","code":<status>}}`.
//! Internal causes are logged with the request id, never returned.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("monthly budget exceeded")]
    BudgetExceeded,

    #[error("rate limit exceeded: {limit} requests per minute")]
    RateLimited { limit: u32 },

    #[error("{0}")]
    BadRequest(String),

    #[error("no provider available")]
    NoProvider,

    #[error("all providers failed: {0}")]
    UpstreamFailed(String),

    #[error("server is shutting down")]
    ShuttingDown,

    #[error("internal error")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl GatewayError {
    pub fn internal<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal(Box::new(err))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BudgetExceeded => StatusCode::PAYMENT_REQUIRED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NoProvider | Self::UpstreamFailed(_) => StatusCode::BAD_GATEWAY,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match &self {
            // The internal cause goes to the log, not the client.
            Self::Internal(source) => {
                tracing::error!(error = %source, "internal gateway error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorEnvelope::new(status, message))).into_response()
    }
}

/// The wire envelope for error responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub code: u16,
}

impl ErrorEnvelope {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
                kind: "error".to_string(),
                code: status.as_u16(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        let envelope = ErrorEnvelope::new(StatusCode::UNAUTHORIZED, "missing API key");
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["error"]["message"], "missing API key");
        assert_eq!(json["error"]["type"], "error");
        assert_eq!(json["error"]["code"], 401);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            GatewayError::Unauthorized("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::BudgetExceeded.status(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            GatewayError::RateLimited { limit: 10 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(GatewayError::NoProvider.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            GatewayError::ShuttingDown.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn internal_error_hides_cause() {
        let err = GatewayError::internal(std::io::Error::other("secret detail"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
