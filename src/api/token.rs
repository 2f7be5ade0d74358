//! Token store seam for hierarchical token revocation.

use async_trait::async_trait;
use snafu::Snafu;

/// Failures surfaced by [`TokenStore::revoke_tree`].
#[derive(Debug, Snafu)]
pub enum TokenStoreError {
    /// The token store failed to revoke the tree.
    #[snafu(display("token tree revocation failed: {message}"))]
    RevokeTree {
        /// Store-provided failure description.
        message: String,
    },
}

/// Hierarchical token store. Leases produced by login flows delegate their
/// revocation here instead of the backend router, because revoking a login
/// token must cascade to its child tokens and their leases.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Revoke a token and everything beneath it.
    async fn revoke_tree(&self, token: &str) -> Result<(), TokenStoreError>;
}
