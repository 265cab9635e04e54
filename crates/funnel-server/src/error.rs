//! JSON error replies
//!
//! Routes answer in one of two shapes: registration and checkout routes use
//! `{resultado: "error", mensaje}`, activation and status routes use
//! `{ok: false, error}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiError {
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }

    /// `{resultado: "error", mensaje}`
    pub fn resultado(status: StatusCode, mensaje: impl Into<String>) -> Self {
        Self::new(status, json!({ "resultado": "error", "mensaje": mensaje.into() }))
    }

    /// `{ok: false, error}`
    pub fn not_ok(status: StatusCode, error: impl Into<String>) -> Self {
        Self::new(status, json!({ "ok": false, "error": error.into() }))
    }

    /// Add a `detalle` field for server-side diagnosis
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        if let Value::Object(map) = &mut self.body {
            map.insert("detalle".into(), Value::String(detail.into()));
        }
        self
    }

    /// Mirror an upstream reply; out-of-range codes become 502
    pub fn upstream(status: u16, body: Value) -> Self {
        let status = StatusCode::from_u16(status)
            .ok()
            .filter(|s| s.is_client_error() || s.is_server_error())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        Self::new(status, body)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resultado_shape() {
        let err = ApiError::resultado(StatusCode::BAD_REQUEST, "Falta nombre").with_detail("x");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.body, json!({"resultado": "error", "mensaje": "Falta nombre", "detalle": "x"}));
    }

    #[test]
    fn test_upstream_status_is_kept_when_an_error() {
        assert_eq!(ApiError::upstream(422, json!({})).status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ApiError::upstream(200, json!({})).status, StatusCode::BAD_GATEWAY);
        assert_eq!(ApiError::upstream(42, json!({})).status, StatusCode::BAD_GATEWAY);
    }
}
