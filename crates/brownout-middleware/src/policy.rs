//! Caller-supplied policies for the load-shedding gate.
//!
//! - [`Bypass`] decides which requests skip the gate entirely
//! - [`RejectionHandler`] shapes the response for a shed request
//!
//! Both are implemented for plain closures.

use crate::context::MiddlewareContext;
use crate::types::{Request, Response};
use brownout_core::ShedError;

/// Selects requests that skip load shedding.
///
/// A bypassed request is forwarded without sampling the load metric.
pub trait Bypass: Send + Sync + 'static {
    /// Returns true if `request` must not be shed.
    fn should_bypass(&self, ctx: &MiddlewareContext, request: &Request) -> bool;
}

impl<F> Bypass for F
where
    F: Fn(&MiddlewareContext, &Request) -> bool + Send + Sync + 'static,
{
    fn should_bypass(&self, ctx: &MiddlewareContext, request: &Request) -> bool {
        self(ctx, request)
    }
}

/// Bypasses requests whose path falls under one of the configured prefixes.
///
/// Matching follows path segments: `/health` covers `/health` and
/// `/health/live`, but not `/healthcheck`.
///
/// # Example
///
/// ```
/// use brownout_middleware::PathBypass;
///
/// let bypass = PathBypass::new(["/health", "/ready"]);
/// assert!(bypass.matches("/health/live"));
/// assert!(!bypass.matches("/healthcheck"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathBypass {
    prefixes: Vec<String>,
}

impl PathBypass {
    /// Creates a bypass for the given path prefixes.
    ///
    /// Trailing slashes are ignored, except for `/` itself which matches
    /// every path.
    #[must_use]
    pub fn new<I, P>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let prefixes = prefixes
            .into_iter()
            .map(|p| {
                let p: String = p.into();
                match p.trim_end_matches('/') {
                    "" => "/".to_string(),
                    trimmed => trimmed.to_string(),
                }
            })
            .collect();
        Self { prefixes }
    }

    /// Returns the normalized prefixes.
    #[must_use]
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Returns true if `path` falls under any prefix.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            if prefix == "/" {
                return true;
            }
            path.strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }
}

impl Bypass for PathBypass {
    fn should_bypass(&self, _ctx: &MiddlewareContext, request: &Request) -> bool {
        self.matches(request.uri().path())
    }
}

/// Shapes the response for a shed request.
///
/// The handler receives a fresh empty `200 OK` response to fill in. Returning
/// `Ok(())` sends whatever the handler left in it. Returning an error
/// discards those writes and sends the error's response instead, so an
/// explicit failure always takes precedence.
///
/// # Example
///
/// ```
/// use brownout_core::ShedError;
/// use brownout_middleware::{MiddlewareContext, RejectionHandler, Request, Response};
///
/// let handler = |_ctx: &MiddlewareContext, _req: &Request, res: &mut Response| {
///     *res.status_mut() = http::StatusCode::TOO_MANY_REQUESTS;
///     Ok::<(), ShedError>(())
/// };
/// # fn assert_handler<H: RejectionHandler>(_: H) {}
/// # assert_handler(handler);
/// ```
pub trait RejectionHandler: Send + Sync + 'static {
    /// Fills in `response` for a shed request.
    ///
    /// # Errors
    ///
    /// An error replaces the response with its own rendering.
    fn on_shed(
        &self,
        ctx: &MiddlewareContext,
        request: &Request,
        response: &mut Response,
    ) -> Result<(), ShedError>;
}

impl<F> RejectionHandler for F
where
    F: Fn(&MiddlewareContext, &Request, &mut Response) -> Result<(), ShedError>
        + Send
        + Sync
        + 'static,
{
    fn on_shed(
        &self,
        ctx: &MiddlewareContext,
        request: &Request,
        response: &mut Response,
    ) -> Result<(), ShedError> {
        self(ctx, request, response)
    }
}
