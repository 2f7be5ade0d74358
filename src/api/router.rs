//! Routing seam: maps a backend path to the backend that owns it and
//! forwards revoke/renew requests.

use async_trait::async_trait;
use snafu::Snafu;

use super::request::Request;
use super::request::Response;

/// Failures surfaced by [`SecretRouter::route`].
#[derive(Debug, Snafu)]
pub enum RouterError {
    /// No backend is mounted at the request path.
    #[snafu(display("no backend mounted for path '{path}'"))]
    NoRoute {
        /// The unroutable request path.
        path: String,
    },

    /// The backend accepted the request but failed to execute it.
    #[snafu(display("backend request failed: {message}"))]
    Backend {
        /// Backend-provided failure description.
        message: String,
    },
}

/// Dispatch layer that maps a request path to a backend and forwards the
/// request. The expiration manager consumes it as a single capability; the
/// concrete router is polymorphic over backend kinds.
#[async_trait]
pub trait SecretRouter: Send + Sync {
    /// Route a request to the backend mounted at its path. A `None` response
    /// means the backend had nothing to say, which is the common case for
    /// revocation.
    async fn route(&self, request: Request) -> Result<Option<Response>, RouterError>;
}
