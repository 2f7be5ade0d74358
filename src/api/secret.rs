//! Secret descriptor attached to leased backend responses.

use chrono::Duration;
use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;
use snafu::ensure;

/// Validation failures reported by [`Secret::validate`].
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum SecretError {
    /// The lease duration is negative.
    #[snafu(display("lease duration must not be negative: {lease_ms}ms"))]
    NegativeLease {
        /// Offending lease duration in milliseconds.
        lease_ms: i64,
    },

    /// The grace period is negative.
    #[snafu(display("lease grace period must not be negative: {grace_ms}ms"))]
    NegativeGracePeriod {
        /// Offending grace period in milliseconds.
        grace_ms: i64,
    },

    /// The renewal increment is negative.
    #[snafu(display("lease increment must not be negative: {increment_ms}ms"))]
    NegativeIncrement {
        /// Offending increment in milliseconds.
        increment_ms: i64,
    },

    /// A non-renewable secret carries a renewal increment.
    #[snafu(display("secret is not renewable but carries a lease increment"))]
    NonRenewableIncrement,
}

/// Lease descriptor a backend attaches to a response when the secret it
/// returns is time-bound.
///
/// Durations are signed so that malformed values arriving over a seam can be
/// rejected by [`Secret::validate`] instead of silently wrapping. On the wire
/// they are whole milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    /// Nominal lease duration. Zero means the secret is not leased.
    #[serde(with = "duration_ms")]
    pub lease: Duration,

    /// Additional time past the nominal lease during which the secret
    /// remains usable. Total expiry is lease + grace.
    #[serde(with = "duration_ms", default = "Duration::zero")]
    pub lease_grace_period: Duration,

    /// Whether the backend allows this lease to be renewed.
    #[serde(default)]
    pub renewable: bool,

    /// Requested extension, populated only on renew requests routed back to
    /// the backend. Backends may ignore it.
    #[serde(with = "duration_ms", default = "Duration::zero")]
    pub lease_increment: Duration,

    /// Identifier slot filled by the expiration manager once the lease is
    /// registered. Empty on freshly minted secrets.
    #[serde(default)]
    pub lease_id: String,
}

impl Secret {
    /// Create a renewable secret with the given lease and no grace period.
    pub fn with_lease(lease: Duration) -> Self {
        Self {
            lease,
            lease_grace_period: Duration::zero(),
            renewable: true,
            lease_increment: Duration::zero(),
            lease_id: String::new(),
        }
    }

    /// Total lifetime of the lease: nominal duration plus grace period.
    pub fn lease_total(&self) -> Duration {
        self.lease + self.lease_grace_period
    }

    /// Self-check a descriptor before the manager acts on it.
    pub fn validate(&self) -> Result<(), SecretError> {
        ensure!(
            self.lease >= Duration::zero(),
            NegativeLeaseSnafu {
                lease_ms: self.lease.num_milliseconds()
            }
        );
        ensure!(
            self.lease_grace_period >= Duration::zero(),
            NegativeGracePeriodSnafu {
                grace_ms: self.lease_grace_period.num_milliseconds()
            }
        );
        ensure!(
            self.lease_increment >= Duration::zero(),
            NegativeIncrementSnafu {
                increment_ms: self.lease_increment.num_milliseconds()
            }
        );
        ensure!(
            self.renewable || self.lease_increment.is_zero(),
            NonRenewableIncrementSnafu
        );
        Ok(())
    }
}

/// Serde adapter storing signed durations as whole milliseconds.
mod duration_ms {
    use chrono::Duration;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = i64::deserialize(deserializer)?;
        Ok(Duration::milliseconds(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_secret_passes() {
        let secret = Secret::with_lease(Duration::seconds(30));
        assert_eq!(secret.validate(), Ok(()));
    }

    #[test]
    fn negative_lease_rejected() {
        let secret = Secret::with_lease(Duration::seconds(-1));
        assert_eq!(
            secret.validate(),
            Err(SecretError::NegativeLease { lease_ms: -1000 })
        );
    }

    #[test]
    fn negative_grace_rejected() {
        let secret = Secret {
            lease_grace_period: Duration::milliseconds(-5),
            ..Secret::with_lease(Duration::seconds(30))
        };
        assert_eq!(
            secret.validate(),
            Err(SecretError::NegativeGracePeriod { grace_ms: -5 })
        );
    }

    #[test]
    fn non_renewable_increment_rejected() {
        let secret = Secret {
            renewable: false,
            lease_increment: Duration::seconds(10),
            ..Secret::with_lease(Duration::seconds(30))
        };
        assert_eq!(
            secret.validate(),
            Err(SecretError::NonRenewableIncrement)
        );
    }

    #[test]
    fn durations_survive_serialization() {
        let secret = Secret {
            lease_grace_period: Duration::milliseconds(250),
            ..Secret::with_lease(Duration::milliseconds(1500))
        };
        let json = serde_json::to_string(&secret).unwrap();
        let decoded: Secret = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, secret);
    }

    #[test]
    fn absent_optional_fields_default() {
        let decoded: Secret = serde_json::from_str(r#"{"lease": 60000}"#).unwrap();
        assert_eq!(decoded.lease, Duration::seconds(60));
        assert_eq!(decoded.lease_grace_period, Duration::zero());
        assert!(!decoded.renewable);
        assert!(decoded.lease_id.is_empty());
    }
}
