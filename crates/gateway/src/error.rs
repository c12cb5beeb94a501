use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Single error taxonomy for the whole gateway. Handlers return
/// `Result<T, GatewayError>`; the `?` operator does the mapping once at
/// the handler boundary instead of scattering status codes through
/// business logic.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),
    /// Uniform wording across every credential-related failure — unknown
    /// user, bad password, inactive account, bad/expired/reused token —
    /// so responses never reveal which case occurred.
    #[error("{0}")]
    AuthFailure(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("rate limited")]
    RateLimited { retry_after_secs: u64 },
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            GatewayError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", msg.clone())
            }
            GatewayError::AuthFailure(msg) => {
                (StatusCode::UNAUTHORIZED, "unauthorised", msg.clone())
            }
            GatewayError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone()),
            GatewayError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            GatewayError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            GatewayError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "too many requests".to_string(),
            ),
            GatewayError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg.clone())
            }
            GatewayError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone())
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if matches!(self, GatewayError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let (status, code, message) = self.parts();
        let mut response = (
            status,
            Json(json!({ "status": status.as_u16(), "code": code, "message": message })),
        )
            .into_response();
        if let GatewayError::RateLimited { retry_after_secs } = self
            && let Ok(value) = axum::http::HeaderValue::from_str(&retry_after_secs.to_string())
        {
            response.headers_mut().insert("retry-after", value);
        }
        response
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
