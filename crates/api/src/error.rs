use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use inkcache_core::CoreError;
use serde_json::json;
use tracing::warn;

/// Wraps `CoreError` so the HTTP boundary can implement `IntoResponse`
/// directly on it: a status-code match, a JSON body, and `warn!` on
/// server-caused branches.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub CoreError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let (status, error_type) = match &err {
            CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            CoreError::UpstreamRateLimited { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "upstream_rate_limited")
            }
            CoreError::UpstreamBlocked => (StatusCode::SERVICE_UNAVAILABLE, "upstream_blocked"),
            CoreError::StoreFatal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_fatal"),
            CoreError::StoreBusy(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_busy"),
            CoreError::UpstreamUnreachable(_) => (StatusCode::BAD_GATEWAY, "upstream_unreachable"),
            CoreError::UpstreamInvalid(_) => (StatusCode::BAD_GATEWAY, "upstream_invalid"),
            CoreError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            // No official reqwest/http StatusCode constant for 499; the
            // nearest analogue (client-closed-request) used by nginx.
            CoreError::Cancelled => (StatusCode::from_u16(499).unwrap(), "cancelled"),
        };

        if status.is_server_error() {
            warn!(error_type, error = %err, "request failed");
        }

        let mut response = (
            status,
            Json(json!({
                "error": error_type,
                "message": err.to_string(),
            })),
        )
            .into_response();

        if let Some(retry_after) = err.retry_after_secs() {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
