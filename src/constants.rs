//! Tuning constants for the lease expiration subsystem.
//!
//! Tiger Style: constants are fixed and immutable, enforced at compile time.
//! Changing any of these is a code change, not a configuration change.

use std::time::Duration;

/// Sub-path under the enclosing system view where lease entries are stored.
pub const EXPIRATION_SUB_PATH: &str = "expire/";

/// Maximum revoke attempts made by a timer-driven expiry before the lease is
/// abandoned until the next restore.
pub const MAX_REVOKE_ATTEMPTS: u32 = 6;

/// Base delay for the exponential revoke retry backoff (doubles per attempt).
pub const REVOKE_RETRY_BASE: Duration = Duration::from_secs(10);

/// Minimum delay before revoking a lease that was already expired when the
/// manager restored it. Prevents a thundering herd of revocations at boot.
pub const MIN_REVOKE_DELAY: Duration = Duration::from_secs(5);
