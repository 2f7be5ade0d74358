//! Recording test doubles for the router and token store seams.
//!
//! These doubles let the full lease lifecycle run without real backends:
//! every routed request is recorded with its arrival time on the tokio
//! clock, and failure behavior can be scripted per test.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::api::Operation;
use crate::api::Request;
use crate::api::Response;
use crate::api::RouterError;
use crate::api::SecretRouter;
use crate::api::TokenStore;
use crate::api::TokenStoreError;

/// A request observed by [`RecordingRouter`], stamped with the tokio clock
/// so tests under paused time can assert on scheduling shape.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// When the request arrived.
    pub at: Instant,
    /// The requested operation.
    pub operation: Operation,
    /// The backend path the request targeted.
    pub path: String,
}

/// Scripted in-memory router that records every routed request.
///
/// Revocations succeed unless scripted to fail; renewals answer with the
/// scripted response, defaulting to a secret-less one (the backend
/// declines to renew).
pub struct RecordingRouter {
    requests: Mutex<Vec<RecordedRequest>>,
    revoke_failures: Mutex<usize>,
    renew_response: Mutex<Option<Response>>,
}

impl RecordingRouter {
    /// Create a router that routes everything successfully.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            revoke_failures: Mutex::new(0),
            renew_response: Mutex::new(None),
        })
    }

    /// Script the next `count` revocations to fail.
    pub fn fail_revocations(&self, count: usize) {
        *self.revoke_failures.lock().unwrap() = count;
    }

    /// Script the response handed back for renew requests.
    pub fn set_renew_response(&self, response: Response) {
        *self.renew_response.lock().unwrap() = Some(response);
    }

    /// Snapshot of every recorded request, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of revoke requests observed.
    pub fn revoke_count(&self) -> usize {
        self.count_of(Operation::Revoke)
    }

    /// Number of renew requests observed.
    pub fn renew_count(&self) -> usize {
        self.count_of(Operation::Renew)
    }

    /// Arrival times of observed revoke requests, in order.
    pub fn revoke_instants(&self) -> Vec<Instant> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|req| req.operation == Operation::Revoke)
            .map(|req| req.at)
            .collect()
    }

    fn count_of(&self, operation: Operation) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|req| req.operation == operation)
            .count()
    }
}

#[async_trait]
impl SecretRouter for RecordingRouter {
    async fn route(&self, request: Request) -> Result<Option<Response>, RouterError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            at: Instant::now(),
            operation: request.operation,
            path: request.path.clone(),
        });

        match request.operation {
            Operation::Revoke => {
                let mut failures = self.revoke_failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(RouterError::Backend {
                        message: "scripted revocation failure".to_string(),
                    });
                }
                Ok(None)
            }
            Operation::Renew => {
                let scripted = self.renew_response.lock().unwrap().clone();
                Ok(Some(scripted.unwrap_or_default()))
            }
            _ => Ok(None),
        }
    }
}

/// Recording token store whose tree revocations always succeed.
pub struct RecordingTokenStore {
    revoked: Mutex<Vec<String>>,
}

impl RecordingTokenStore {
    /// Create an empty recording token store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            revoked: Mutex::new(Vec::new()),
        })
    }

    /// Tokens whose trees were revoked, in order.
    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenStore for RecordingTokenStore {
    async fn revoke_tree(&self, token: &str) -> Result<(), TokenStoreError> {
        self.revoked.lock().unwrap().push(token.to_string());
        Ok(())
    }
}
