//! Lease lifecycle management and automatic revocation.
//!
//! When a backend mints a secret with a time-bound lease, the
//! [`ExpirationManager`] takes over: it assigns the lease a stable
//! identifier, records it durably, schedules automatic revocation at expiry,
//! and services explicit renew and revoke requests. After a restart the
//! manager rebuilds its timer set from durable state, so no lease outlives a
//! crash unrevoked.
//!
//! # Architecture
//!
//! ```text
//! register(request, response)
//!         |
//!         v
//! persist lease entry --> arm expiration timer
//!                              |
//!                              v
//!                    timer fires: expire_id
//!                              |
//!                              v
//!          revoke via router / token store --> delete entry
//! ```
//!
//! Explicit `revoke`/`renew` short-circuit or reschedule the timer;
//! `restore` re-arms timers over existing entries at startup; `stop`
//! quiesces every timer before the storage barrier is sealed.

mod entry;
mod error;

pub use entry::LeaseEntry;
pub use error::ExpirationError;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use chrono::Utc;
use serde_json::Map;
use snafu::ResultExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use uuid::Uuid;

use crate::api::Request;
use crate::api::Response;
use crate::api::SecretRouter;
use crate::api::StorageEntry;
use crate::api::TokenStore;
use crate::api::View;
use crate::constants::EXPIRATION_SUB_PATH;
use crate::constants::MAX_REVOKE_ATTEMPTS;
use crate::constants::MIN_REVOKE_DELAY;
use crate::constants::REVOKE_RETRY_BASE;
use crate::expiration::error::DecodeSnafu;
use crate::expiration::error::EncodeSnafu;
use crate::expiration::error::InvalidSecretSnafu;
use crate::expiration::error::LeaseExpiredSnafu;
use crate::expiration::error::LeaseNotFoundSnafu;
use crate::expiration::error::RenewEntrySnafu;
use crate::expiration::error::RestoreSnafu;
use crate::expiration::error::RevokeEntrySnafu;
use crate::expiration::error::RevokePrefixSnafu;
use crate::expiration::error::RevokeTokenSnafu;
use crate::expiration::error::ScanSnafu;
use crate::expiration::error::StorageSnafu;

/// A live expiration timer for one lease. Cancelling the token makes the
/// spawned sleep task exit without firing.
struct PendingTimer {
    cancel: CancellationToken,
}

/// Manages the lifecycle of leased secrets: registration, renewal, explicit
/// and automatic revocation, and crash recovery.
///
/// The manager owns a prefix-scoped [`View`] for durable lease entries and a
/// volatile pending-timer table mapping lease ids to armed timers. The table
/// mutex is held only for table mutation (and the startup restore walk),
/// never across router or token store dispatch.
pub struct ExpirationManager {
    router: Arc<dyn SecretRouter>,
    view: View,
    token_store: Arc<dyn TokenStore>,
    pending: Mutex<HashMap<String, PendingTimer>>,
}

impl ExpirationManager {
    /// Create a manager backed by the given view. No timers are armed until
    /// [`ExpirationManager::restore`] runs; most callers want
    /// [`ExpirationManager::start`] instead.
    pub fn new(
        router: Arc<dyn SecretRouter>,
        view: View,
        token_store: Arc<dyn TokenStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            router,
            view,
            token_store,
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Wire a manager under the expiration sub-view of the enclosing system
    /// view and restore its timer set from durable state. A restore failure
    /// aborts startup: the manager must not begin service with an unknown
    /// set of pending leases.
    pub async fn start(
        router: Arc<dyn SecretRouter>,
        system_view: &View,
        token_store: Arc<dyn TokenStore>,
    ) -> Result<Arc<Self>, ExpirationError> {
        let manager = Self::new(
            router,
            system_view.sub_view(EXPIRATION_SUB_PATH),
            token_store,
        );
        manager.restore().await.context(RestoreSnafu)?;
        Ok(manager)
    }

    /// Take over a leased response produced by a backend.
    ///
    /// Returns the minted lease id, or `None` when there is nothing to
    /// manage: no response, no secret, or a secret with a zero lease.
    pub async fn register(
        self: &Arc<Self>,
        request: &Request,
        response: Option<&Response>,
    ) -> Result<Option<String>, ExpirationError> {
        let Some(response) = response else {
            return Ok(None);
        };
        let Some(secret) = response.secret.as_ref() else {
            return Ok(None);
        };
        if secret.lease.is_zero() {
            return Ok(None);
        }
        secret.validate().context(InvalidSecretSnafu)?;

        let now = Utc::now();
        let lease_total = secret.lease_total();
        let expire_time = (secret.lease > Duration::zero()).then(|| now + lease_total);

        let lease_id = join_path(&request.path, &Uuid::new_v4().to_string());
        let mut secret = secret.clone();
        secret.lease_id = lease_id.clone();

        let entry = LeaseEntry {
            lease_id: lease_id.clone(),
            login_token: String::new(),
            path: request.path.clone(),
            data: response.data.clone(),
            secret,
            issue_time: now,
            expire_time,
            extra: Map::new(),
        };

        // Persist before arming: a crash between the two must not leave a
        // fired timer with no backing entry.
        self.persist_entry(&entry).await?;

        if expire_time.is_some() {
            self.schedule_expiry(lease_id.clone(), to_std(lease_total)).await;
        }
        Ok(Some(lease_id))
    }

    /// Take over a lease produced by a login flow. The lease is tied to
    /// `token`, and revoking it cascades through the token store's tree
    /// revocation instead of the backend router.
    pub async fn register_login(
        self: &Arc<Self>,
        token: &str,
        request: &Request,
        response: Option<&Response>,
    ) -> Result<Option<String>, ExpirationError> {
        let Some(response) = response else {
            return Ok(None);
        };
        let Some(secret) = response.secret.as_ref() else {
            return Ok(None);
        };
        if secret.lease.is_zero() {
            return Ok(None);
        }
        secret.validate().context(InvalidSecretSnafu)?;

        let now = Utc::now();
        let lease_total = secret.lease_total();
        let lease_id = join_path(&request.path, &Uuid::new_v4().to_string());
        let mut secret = secret.clone();
        secret.lease_id = lease_id.clone();

        let entry = LeaseEntry {
            lease_id: lease_id.clone(),
            login_token: token.to_string(),
            path: request.path.clone(),
            data: response.data.clone(),
            secret,
            issue_time: now,
            expire_time: Some(now + lease_total),
            extra: Map::new(),
        };
        self.persist_entry(&entry).await?;
        self.schedule_expiry(lease_id.clone(), to_std(lease_total)).await;
        Ok(Some(lease_id))
    }

    /// Revoke the lease named by `lease_id`.
    ///
    /// Revoking an unknown lease succeeds silently, which makes explicit
    /// revocation idempotent and lets it lose the race against a
    /// timer-driven expiry without error.
    pub async fn revoke(&self, lease_id: &str) -> Result<(), ExpirationError> {
        let Some(entry) = self.load_entry(lease_id).await? else {
            return Ok(());
        };

        self.revoke_entry(&entry).await?;

        // Delete only after the backend acknowledged; a crash in between
        // yields a retried revoke on restore, not a lost lease.
        self.delete_entry(lease_id).await?;

        let mut pending = self.pending.lock().await;
        if let Some(timer) = pending.remove(lease_id) {
            timer.cancel.cancel();
        }
        Ok(())
    }

    /// Revoke every lease under `prefix`, which is normalized to end in `/`.
    ///
    /// Leases are revoked in scan order; the first failure stops the sweep
    /// and names the failing lease and its position. Partial progress is
    /// observable through the storage state.
    pub async fn revoke_prefix(&self, prefix: &str) -> Result<(), ExpirationError> {
        let prefix = if prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{prefix}/")
        };

        let sub = self.view.sub_view(&prefix);
        let existing = sub.collect_keys().await.context(ScanSnafu)?;
        let total = existing.len();

        for (idx, suffix) in existing.iter().enumerate() {
            let lease_id = format!("{prefix}{suffix}");
            self.revoke(&lease_id).await.with_context(|_| RevokePrefixSnafu {
                lease_id: lease_id.clone(),
                index: idx + 1,
                total,
            })?;
        }
        Ok(())
    }

    /// Renew the lease named by `lease_id`, asking the backend for
    /// `increment` more time. The backend may ignore the increment.
    ///
    /// A response with no secret or a zero lease is handed back verbatim
    /// without mutating state: the backend has declined to renew.
    pub async fn renew(
        self: &Arc<Self>,
        lease_id: &str,
        increment: Duration,
    ) -> Result<Option<Response>, ExpirationError> {
        let Some(mut entry) = self.load_entry(lease_id).await? else {
            return LeaseNotFoundSnafu { lease_id }.fail();
        };

        let now = Utc::now();
        // A non-expiring entry has no expire time to extend; it fails the
        // same way an already-expired one does.
        if entry.expire_time.map_or(true, |expire| expire < now) {
            return LeaseExpiredSnafu { lease_id }.fail();
        }

        let Some(mut response) = self.renew_entry(&entry, increment).await? else {
            return Ok(None);
        };
        let renewed = match response.secret.as_mut() {
            Some(secret) if !secret.lease.is_zero() => secret,
            _ => return Ok(Some(response)),
        };
        renewed.validate().context(InvalidSecretSnafu)?;
        renewed.lease_id = lease_id.to_string();

        let lease_total = renewed.lease_total();
        let expire_time = (renewed.lease > Duration::zero()).then(|| now + lease_total);
        entry.secret = renewed.clone();
        entry.data = response.data.clone();
        entry.expire_time = expire_time;
        self.persist_entry(&entry).await?;

        // Reset only an armed timer; an expiry already in flight has left
        // the table and is not rescheduled until the next restore.
        let mut pending = self.pending.lock().await;
        if let Some(timer) = pending.remove(lease_id) {
            timer.cancel.cancel();
            self.schedule_locked(&mut pending, lease_id.to_string(), to_std(lease_total));
        }
        drop(pending);

        Ok(Some(response))
    }

    /// Rebuild the pending-timer set from durable state. Runs once at
    /// startup, before the manager serves requests.
    ///
    /// Entries without an expire time are skipped. Entries already due are
    /// clamped to [`MIN_REVOKE_DELAY`] so boot is not a thundering herd of
    /// simultaneous revocations and the router gets a window to become
    /// ready. Any scan or load failure aborts the restore.
    pub async fn restore(self: &Arc<Self>) -> Result<(), ExpirationError> {
        let mut pending = self.pending.lock().await;

        let existing = self.view.collect_keys().await.context(ScanSnafu)?;
        for lease_id in existing {
            let Some(entry) = self.load_entry(&lease_id).await? else {
                continue;
            };
            let Some(expire_time) = entry.expire_time else {
                continue;
            };

            let remaining = expire_time - Utc::now();
            let delay = if remaining <= Duration::zero() {
                MIN_REVOKE_DELAY
            } else {
                to_std(remaining)
            };
            self.schedule_locked(&mut pending, entry.lease_id, delay);
        }

        if !pending.is_empty() {
            info!(count = pending.len(), "restored leases");
        }
        Ok(())
    }

    /// Cancel every pending timer and empty the table. Idempotent; durable
    /// state is untouched. Must run before the underlying storage is sealed.
    pub async fn stop(&self) {
        let mut pending = self.pending.lock().await;
        for (_, timer) in pending.drain() {
            timer.cancel.cancel();
        }
    }

    /// Number of leases with an armed expiration timer.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Timer callback for a lease that reached its expire time. Retries
    /// revocation with exponential backoff; on exhaustion the entry stays in
    /// storage and is retried after the next restart.
    async fn expire_id(&self, lease_id: &str) {
        // Leave the pending table before the first attempt so a concurrent
        // explicit revoke cannot operate on a stale timer handle.
        {
            let mut pending = self.pending.lock().await;
            pending.remove(lease_id);
        }

        for attempt in 0..MAX_REVOKE_ATTEMPTS {
            match self.revoke(lease_id).await {
                Ok(()) => {
                    info!(lease_id, "revoked expired lease");
                    return;
                }
                Err(err) => {
                    error!(lease_id, attempt, error = %err, "failed to revoke expired lease");
                    if attempt + 1 < MAX_REVOKE_ATTEMPTS {
                        tokio::time::sleep(REVOKE_RETRY_BASE * (1u32 << attempt)).await;
                    }
                }
            }
        }
        error!(lease_id, "maximum revoke attempts reached, lease retained until restart");
    }

    /// Arm a timer for `lease_id` after taking the table lock.
    async fn schedule_expiry(self: &Arc<Self>, lease_id: String, delay: StdDuration) {
        let mut pending = self.pending.lock().await;
        self.schedule_locked(&mut pending, lease_id, delay);
    }

    /// Arm a timer for `lease_id` with the table lock already held. Replaces
    /// and cancels any timer already armed for the id.
    fn schedule_locked(
        self: &Arc<Self>,
        pending: &mut HashMap<String, PendingTimer>,
        lease_id: String,
        delay: StdDuration,
    ) {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let manager = Arc::clone(self);
        let id = lease_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => manager.expire_id(&id).await,
            }
        });

        if let Some(previous) = pending.insert(lease_id, PendingTimer { cancel }) {
            previous.cancel.cancel();
        }
    }

    /// Dispatch the revocation of one entry. Login-token leases bypass the
    /// router: the token store cascades through the token tree.
    async fn revoke_entry(&self, entry: &LeaseEntry) -> Result<(), ExpirationError> {
        if !entry.login_token.is_empty() {
            return self
                .token_store
                .revoke_tree(&entry.login_token)
                .await
                .context(RevokeTokenSnafu);
        }

        self.router
            .route(Request::revoke(
                &entry.path,
                entry.secret.clone(),
                entry.data.clone(),
            ))
            .await
            .context(RevokeEntrySnafu)?;
        Ok(())
    }

    /// Dispatch a renewal request for one entry. The routed secret carries
    /// the requested increment and a cleared id slot: backends must not
    /// depend on the manager's opaque id.
    async fn renew_entry(
        &self,
        entry: &LeaseEntry,
        increment: Duration,
    ) -> Result<Option<Response>, ExpirationError> {
        let mut secret = entry.secret.clone();
        secret.lease_increment = increment;
        secret.lease_id = String::new();

        self.router
            .route(Request::renew(&entry.path, secret, entry.data.clone()))
            .await
            .context(RenewEntrySnafu)
    }

    /// Read and decode a lease entry, `None` if absent.
    async fn load_entry(&self, lease_id: &str) -> Result<Option<LeaseEntry>, ExpirationError> {
        let raw = self
            .view
            .get(lease_id)
            .await
            .context(StorageSnafu { operation: "read" })?;
        match raw {
            None => Ok(None),
            Some(raw) => LeaseEntry::decode(&raw.value)
                .context(DecodeSnafu { lease_id })
                .map(Some),
        }
    }

    /// Encode and write a lease entry at its id.
    async fn persist_entry(&self, entry: &LeaseEntry) -> Result<(), ExpirationError> {
        let value = entry.encode().context(EncodeSnafu {
            lease_id: entry.lease_id.as_str(),
        })?;
        self.view
            .put(StorageEntry {
                key: entry.lease_id.clone(),
                value,
            })
            .await
            .context(StorageSnafu { operation: "persist" })
    }

    /// Delete a lease entry at its id.
    async fn delete_entry(&self, lease_id: &str) -> Result<(), ExpirationError> {
        self.view
            .delete(lease_id)
            .await
            .context(StorageSnafu { operation: "delete" })
    }
}

/// Join a request path and a fresh id segment with a single separator.
fn join_path(base: &str, segment: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), segment)
}

/// Convert a non-negative duration for the timer wheel; negatives clamp to
/// zero rather than panic.
fn to_std(duration: Duration) -> StdDuration {
    duration.to_std().unwrap_or_default()
}
