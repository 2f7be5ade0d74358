//! Alder library entry point.
//!
//! Alder is a secrets and credentials broker. Backends mint secrets with
//! time-bound leases; this crate owns what happens afterwards. The
//! [`expiration::ExpirationManager`] assigns each lease a stable identifier,
//! records it durably through a prefix-scoped storage view, schedules
//! automatic revocation at expiry, services explicit renew and revoke
//! requests, and rebuilds its timer set from durable state after a restart.
//!
//! The manager consumes three seams, all defined in [`api`]: a
//! [`api::StorageBackend`] for durable state, a [`api::SecretRouter`] that
//! dispatches revoke/renew requests to the backend that minted the secret,
//! and a [`api::TokenStore`] for cascading revocation of login tokens.
//! Deterministic in-memory implementations of the seams live in
//! [`api::inmemory`] and [`testing`] so the full lifecycle can be exercised
//! without network or disk I/O.

#![warn(missing_docs)]

/// Trait definitions for the storage, routing, and token revocation seams.
pub mod api;
/// Fixed tuning constants for lease expiration.
pub mod constants;
/// Lease lifecycle management and automatic revocation.
pub mod expiration;
/// Recording test doubles for the router and token store seams.
pub mod testing;

pub use api::inmemory::DeterministicStorageBackend;
pub use api::{
    Operation, Request, Response, RouterError, Secret, SecretRouter, StorageBackend, StorageEntry,
    StorageError, TokenStore, TokenStoreError, View,
};
pub use expiration::{ExpirationError, ExpirationManager, LeaseEntry};
