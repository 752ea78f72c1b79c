//! Request ID middleware.
//!
//! Assigns every request an identifier before the load-shedding gate runs,
//! so shed decisions, rejection envelopes and logs all carry the same ID.
//!
//! ## Request ID Sources
//!
//! 1. **X-Request-ID header**: used when incoming IDs are trusted and the
//!    header holds a valid UUID
//! 2. **Generated UUID v7**: otherwise
//!
//! The middleware always echoes the ID in the `X-Request-ID` response header,
//! including on shed responses.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use brownout_core::RequestId;
use http::HeaderValue;
use uuid::Uuid;

/// The header name for request ID propagation.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Middleware that generates or extracts request IDs.
///
/// # Example
///
/// ```
/// use brownout_middleware::stages::RequestIdMiddleware;
/// use brownout_middleware::Middleware;
///
/// let middleware = RequestIdMiddleware::trust_incoming();
/// assert_eq!(middleware.name(), "request_id");
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestIdMiddleware {
    /// Whether to trust incoming request ID headers.
    ///
    /// Only enable this behind a proxy that sets or strips the header.
    trust_incoming: bool,
}

impl RequestIdMiddleware {
    /// Creates a middleware that always generates a fresh ID.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a middleware that reuses valid incoming `X-Request-ID` headers.
    #[must_use]
    pub fn trust_incoming() -> Self {
        Self {
            trust_incoming: true,
        }
    }

    fn extract_request_id(&self, request: &Request) -> Option<RequestId> {
        if !self.trust_incoming {
            return None;
        }

        request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(RequestId::from_uuid)
    }
}

impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &'static str {
        "request_id"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let request_id = self
                .extract_request_id(&request)
                .unwrap_or_else(RequestId::new);
            ctx.set_request_id(request_id);

            let mut response = next.run(ctx, request).await;

            // A UUID always renders as a valid header value.
            if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseExt;
    use bytes::Bytes;
    use http::Request as HttpRequest;
    use http_body_util::Full;

    fn create_test_request() -> Request {
        HttpRequest::builder()
            .uri("/test")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn create_request_with_id(request_id: &str) -> Request {
        HttpRequest::builder()
            .uri("/test")
            .header(REQUEST_ID_HEADER, request_id)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn ok_handler<'a>() -> Next<'a> {
        Next::handler(|_ctx, _req| Box::pin(async { Response::empty() }))
    }

    fn header_id(response: &Response) -> &str {
        response
            .headers()
            .get(REQUEST_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
    }

    #[tokio::test]
    async fn test_generates_request_id_when_missing() {
        let middleware = RequestIdMiddleware::new();
        let mut ctx = MiddlewareContext::new();

        let response = middleware
            .process(&mut ctx, create_test_request(), ok_handler())
            .await;

        assert_eq!(ctx.request_id().to_string(), header_id(&response));
    }

    #[tokio::test]
    async fn test_ignores_incoming_id_when_not_trusted() {
        let middleware = RequestIdMiddleware::new();
        let mut ctx = MiddlewareContext::new();
        let incoming_id = "01234567-89ab-7def-8123-456789abcdef";

        let response = middleware
            .process(&mut ctx, create_request_with_id(incoming_id), ok_handler())
            .await;

        assert_ne!(header_id(&response), incoming_id);
    }

    #[tokio::test]
    async fn test_uses_incoming_id_when_trusted() {
        let middleware = RequestIdMiddleware::trust_incoming();
        let mut ctx = MiddlewareContext::new();
        let incoming_id = "01234567-89ab-7def-8123-456789abcdef";

        let response = middleware
            .process(&mut ctx, create_request_with_id(incoming_id), ok_handler())
            .await;

        assert_eq!(header_id(&response), incoming_id);
        assert_eq!(ctx.request_id().to_string(), incoming_id);
    }

    #[tokio::test]
    async fn test_ignores_invalid_incoming_id() {
        let middleware = RequestIdMiddleware::trust_incoming();
        let mut ctx = MiddlewareContext::new();
        let invalid_id = "not-a-valid-uuid";

        let response = middleware
            .process(&mut ctx, create_request_with_id(invalid_id), ok_handler())
            .await;

        let id = header_id(&response);
        assert_ne!(id, invalid_id);
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn test_trust_incoming_config() {
        assert!(!RequestIdMiddleware::new().trust_incoming);
        assert!(RequestIdMiddleware::trust_incoming().trust_incoming);
    }
}
