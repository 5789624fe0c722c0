use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Wraps a domain error for the HTTP boundary; the kind picks the status.
pub struct ApiError(pub pal_types::Error);

impl From<pal_types::Error> for ApiError {
    fn from(err: pal_types::Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind().http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "error": self.0.message(),
            "kind": self.0.kind(),
            "cause_id": self.0.cause_id(),
        });
        (status, Json(body)).into_response()
    }
}
