//! Request and response shapes exchanged with the secret router.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use super::secret::Secret;

/// Kind of operation a request asks a backend to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Read a secret or configuration from the backend.
    Read,
    /// Write configuration to the backend.
    Write,
    /// Delete configuration from the backend.
    Delete,
    /// List keys under a backend path.
    List,
    /// Revoke a previously issued secret.
    Revoke,
    /// Renew a previously issued secret.
    Renew,
}

/// A request routed to a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Operation the backend should perform.
    pub operation: Operation,
    /// Backend path the request targets.
    pub path: String,
    /// Secret descriptor, present on revoke and renew requests.
    pub secret: Option<Secret>,
    /// Opaque payload carried back to the backend.
    pub data: Map<String, Value>,
}

impl Request {
    /// Build a request with no secret and no payload.
    pub fn new(operation: Operation, path: impl Into<String>) -> Self {
        Self {
            operation,
            path: path.into(),
            secret: None,
            data: Map::new(),
        }
    }

    /// Build a revocation request for a previously issued secret.
    pub fn revoke(path: impl Into<String>, secret: Secret, data: Map<String, Value>) -> Self {
        Self {
            operation: Operation::Revoke,
            path: path.into(),
            secret: Some(secret),
            data,
        }
    }

    /// Build a renewal request for a previously issued secret. The caller is
    /// expected to have populated `secret.lease_increment` and cleared
    /// `secret.lease_id`.
    pub fn renew(path: impl Into<String>, secret: Secret, data: Map<String, Value>) -> Self {
        Self {
            operation: Operation::Renew,
            path: path.into(),
            secret: Some(secret),
            data,
        }
    }
}

/// A backend's answer to a routed request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    /// Lease descriptor when the response carries a leased secret.
    pub secret: Option<Secret>,
    /// Response payload; for leased secrets this is replayed to the backend
    /// on revoke and renew.
    pub data: Map<String, Value>,
}

impl Response {
    /// Build a response carrying a leased secret and its payload.
    pub fn leased(secret: Secret, data: Map<String, Value>) -> Self {
        Self {
            secret: Some(secret),
            data,
        }
    }
}
