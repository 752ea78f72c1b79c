//! Common types used throughout the middleware pipeline.

use brownout_core::ShedError;
use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use http_body_util::Full;

/// The HTTP request type used in the middleware pipeline.
///
/// This is a standard `http::Request` with a `Full<Bytes>` body.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the middleware pipeline.
///
/// This is a standard `http::Response` with a `Full<Bytes>` body.
pub type Response = http::Response<Full<Bytes>>;

/// `Retry-After` header name.
pub const RETRY_AFTER: &str = "retry-after";

/// Extension trait for building responses.
pub trait ResponseExt {
    /// Creates an empty `200 OK` response.
    fn empty() -> Response;
}

impl ResponseExt for Response {
    fn empty() -> Response {
        http::Response::new(Full::new(Bytes::new()))
    }
}

/// Renders a [`ShedError`] as an HTTP response.
pub trait ShedErrorExt {
    /// Builds the JSON error envelope response for this error, including a
    /// `Retry-After` header when the error carries one.
    fn into_response(self, request_id: Option<&str>) -> Response;
}

impl ShedErrorExt for ShedError {
    fn into_response(self, request_id: Option<&str>) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after_seconds();

        // An envelope of plain strings always serializes.
        let body = serde_json::to_string(&self.to_envelope(request_id)).unwrap_or_default();
        let mut response = json_response(status, body);

        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds));
        }

        response
    }
}

fn json_response(status: StatusCode, body: String) -> Response {
    let mut response = http::Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
