//! Trait definitions and data types for the seams the expiration manager
//! consumes: durable storage, backend routing, and token revocation.

pub mod inmemory;
mod request;
mod router;
mod secret;
mod storage;
mod token;

pub use request::{Operation, Request, Response};
pub use router::{RouterError, SecretRouter};
pub use secret::{Secret, SecretError};
pub use storage::{StorageBackend, StorageEntry, StorageError, View};
pub use token::{TokenStore, TokenStoreError};
