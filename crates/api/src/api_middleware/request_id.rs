//! Request ID middleware.
//!
//! Extracts a caller-supplied request id (or generates a UUID), stores it
//! in the request extensions for handlers and logging, and echoes it back
//! on the response so clients can correlate.

use axum::{
    extract::Request,
    http::{header::HeaderValue, HeaderName, StatusCode},
    middleware::Next,
    response::Response,
};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Identifier attached to every request, available via extensions.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

pub async fn request_id_middleware(
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let request_id = extract_or_generate_request_id(&request);

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(
            HeaderName::from_str(REQUEST_ID_HEADER).unwrap(),
            header_value,
        );
    }

    debug!(
        request_id = %request_id,
        status = %response.status(),
        "Request completed"
    );

    Ok(response)
}

fn extract_or_generate_request_id(request: &Request) -> String {
    let possible_headers = [REQUEST_ID_HEADER, "x-correlation-id", "x-trace-id"];

    for header_name in &possible_headers {
        if let Some(value) = request.headers().get(*header_name) {
            if let Ok(id_str) = value.to_str() {
                if is_valid_request_id(id_str) {
                    return id_str.to_string();
                }
            }
        }
    }

    Uuid::new_v4().to_string()
}

/// UUIDs or reasonable alphanumeric identifiers only.
fn is_valid_request_id(id: &str) -> bool {
    if Uuid::from_str(id).is_ok() {
        return true;
    }

    id.len() >= 8
        && id.len() <= 128
        && id.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_request_id_generation() {
        let app = Router::new()
            .route("/", get(|| async { "OK" }))
            .layer(axum::middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let request_id = response.headers().get(REQUEST_ID_HEADER).unwrap();
        assert!(is_valid_request_id(request_id.to_str().unwrap()));
    }

    #[tokio::test]
    async fn test_existing_request_id_preserved() {
        let existing_id = "test-request-id-12345";

        let app = Router::new()
            .route("/", get(|| async { "OK" }))
            .layer(axum::middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(REQUEST_ID_HEADER, existing_id)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let returned_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(returned_id, existing_id);
    }

    #[test]
    fn test_valid_request_id() {
        assert!(is_valid_request_id("550e8400-e29b-41d4-a716-446655440000"));
        assert!(is_valid_request_id("test-request-123"));
        assert!(!is_valid_request_id("abc"));
        assert!(!is_valid_request_id("test@request.id"));
    }
}
