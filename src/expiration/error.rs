//! Error types for lease expiration operations.

use snafu::Snafu;

use crate::api::RouterError;
use crate::api::SecretError;
use crate::api::StorageError;
use crate::api::TokenStoreError;

/// Errors surfaced by the expiration manager.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ExpirationError {
    /// No lease entry exists for the given id.
    #[snafu(display("lease not found: '{lease_id}'"))]
    LeaseNotFound {
        /// The unknown lease id.
        lease_id: String,
    },

    /// The lease's expire time is already in the past.
    #[snafu(display("lease expired: '{lease_id}'"))]
    LeaseExpired {
        /// The expired lease id.
        lease_id: String,
    },

    /// A secret descriptor failed its self-check.
    #[snafu(display("secret failed validation: {source}"))]
    InvalidSecret {
        /// The validation failure.
        source: SecretError,
    },

    /// The storage view failed, annotated with the attempted operation.
    #[snafu(display("failed to {operation} lease entry: {source}"))]
    Storage {
        /// The storage operation that failed.
        operation: String,
        /// The underlying storage failure.
        source: StorageError,
    },

    /// A persisted lease entry could not be decoded.
    #[snafu(display("failed to decode lease entry '{lease_id}': {source}"))]
    Decode {
        /// Key of the undecodable entry.
        lease_id: String,
        /// The underlying decode failure.
        source: serde_json::Error,
    },

    /// A lease entry could not be encoded for storage.
    #[snafu(display("failed to encode lease entry '{lease_id}': {source}"))]
    Encode {
        /// Id of the unencodable entry.
        lease_id: String,
        /// The underlying encode failure.
        source: serde_json::Error,
    },

    /// A key listing failed during restore or prefix revocation.
    #[snafu(display("failed to scan for leases: {source}"))]
    Scan {
        /// The underlying storage failure.
        source: StorageError,
    },

    /// The router refused or failed a revocation request.
    #[snafu(display("failed to revoke entry: {source}"))]
    RevokeEntry {
        /// The underlying router failure.
        source: RouterError,
    },

    /// The router refused or failed a renewal request.
    #[snafu(display("failed to renew entry: {source}"))]
    RenewEntry {
        /// The underlying router failure.
        source: RouterError,
    },

    /// The token store failed to revoke a login token tree.
    #[snafu(display("failed to revoke token: {source}"))]
    RevokeToken {
        /// The underlying token store failure.
        source: TokenStoreError,
    },

    /// A prefix revocation stopped at a failing lease. The position is
    /// 1-based within the scan so partial progress is observable.
    #[snafu(display("failed to revoke '{lease_id}' ({index} / {total}): {source}"))]
    RevokePrefix {
        /// The lease that failed to revoke.
        lease_id: String,
        /// 1-based position of the failing lease in the scan.
        index: usize,
        /// Number of leases the scan found under the prefix.
        total: usize,
        /// The underlying revocation failure.
        #[snafu(source(from(ExpirationError, Box::new)))]
        source: Box<ExpirationError>,
    },

    /// Startup restore failed; the manager must not begin service.
    #[snafu(display("expiration state restore failed: {source}"))]
    Restore {
        /// The underlying restore failure.
        #[snafu(source(from(ExpirationError, Box::new)))]
        source: Box<ExpirationError>,
    },
}
