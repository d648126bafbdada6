//! Responses produced by the router itself.
//!
//! # Design Decisions
//! - Unmatched routes get an empty 404 body
//! - Internal failures never leak error details to the client

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

pub fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

pub fn bad_request() -> Response {
    (StatusCode::BAD_REQUEST, "Bad request").into_response()
}

pub fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
}

/// A 3xx response with a `Location` header. Falls back to a 500 when the
/// location cannot be encoded as a header value.
pub fn redirect(location: &str, status: StatusCode) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = status;
            response.headers_mut().insert(header::LOCATION, value);
            response
        }
        Err(e) => {
            tracing::error!(location = %location, error = %e, "Redirect location is not a valid header value");
            internal_error()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect() {
        let response = redirect("/profile", StatusCode::SEE_OTHER);
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/profile");

        let response = redirect("/bad\nlocation", StatusCode::FOUND);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_not_found_is_empty() {
        let response = not_found();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert!(body.is_empty());
    }
}
