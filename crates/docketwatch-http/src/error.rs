//! Mapping of core errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use docketwatch_core::DocketError;
use serde_json::json;

/// A [`DocketError`] on its way out as `{"error": ...}` with its status code.
#[derive(Debug)]
pub struct ApiError(pub DocketError);

impl From<DocketError> for ApiError {
    fn from(err: DocketError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            log::error!("Request failed: {}", self.0);
        } else {
            log::debug!("Request rejected ({}): {}", status.as_u16(), self.0);
        }

        let mut body = json!({ "error": self.0.to_string() });
        if let DocketError::Validation { field: Some(field), .. } = &self.0 {
            body["field"] = json!(field);
        }
        (status, Json(body)).into_response()
    }
}

/// Parse a JSON request body; an empty body parses as `null`.
pub fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        &b"null"[..]
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|e| ApiError(DocketError::invalid(format!("Invalid JSON body: {}", e))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn status_follows_error_kind() {
        let cases = [
            (DocketError::missing_field("blockId"), StatusCode::BAD_REQUEST),
            (DocketError::SessionRequired, StatusCode::UNAUTHORIZED),
            (DocketError::NotFound("p".into()), StatusCode::NOT_FOUND),
            (DocketError::Conflict("running".into()), StatusCode::CONFLICT),
            (
                DocketError::AutomationFailure { message: "boom".into() },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).into_response().status(), status);
        }
    }

    #[test]
    fn empty_body_is_null() {
        let value: Value = parse_json(b"").unwrap();
        assert!(value.is_null());
        let value: Option<Value> = parse_json(b"  \n").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn malformed_body_is_bad_request() {
        let err = parse_json::<Value>(b"{not json").unwrap_err();
        assert_eq!(err.0.status_code(), 400);
    }
}
