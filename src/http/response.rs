//! JSON error responses.
//!
//! # Responsibilities
//! - Wrap error messages in the `{"error": ...}` envelope
//! - Map panics inside handlers to a 500 that closes the connection
//!
//! # Design Decisions
//! - Messages are generic; details only go to the logs

use std::any::Any;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Send `message` under the `error` key with the given status.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

pub fn rate_limit_exceeded_response() -> Response {
    error_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded")
}

pub fn server_error_response() -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "the server encountered a problem and could not process your request",
    )
}

pub fn not_found_response() -> Response {
    error_response(StatusCode::NOT_FOUND, "the requested resource could not be found")
}

pub fn method_not_allowed_response(method: &Method) -> Response {
    error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        format!("the {method} method is not supported for this resource"),
    )
}

/// Fallback for unmatched routes.
pub async fn not_found_handler() -> Response {
    not_found_response()
}

/// Fallback for a known route requested with a method it does not serve.
pub async fn method_not_allowed_handler(method: Method) -> Response {
    method_not_allowed_response(&method)
}

/// Response for a handler that panicked. Asks the client to close the connection.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    tracing::error!(panic = %message, "Request handler panicked");

    let mut response = server_error_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn error_envelope() {
        let response = rate_limit_exceeded_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "rate limit exceeded");
    }

    #[tokio::test]
    async fn method_not_allowed_names_the_method() {
        let response = method_not_allowed_response(&Method::DELETE);
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            value["error"],
            "the DELETE method is not supported for this resource"
        );
    }

    #[test]
    fn panic_response_closes_connection() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[header::CONNECTION], "close");
    }
}
