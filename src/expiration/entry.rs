//! Durable lease entry and its codec.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::api::Secret;

/// The unit of state the expiration manager persists, one entry per lease.
///
/// The encoding is self-describing JSON so that fields can be added without
/// breaking state written by older versions; timestamps are RFC 3339 text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseEntry {
    /// Globally unique lease identifier: the originating request path joined
    /// with a fresh UUID, so prefix scans by mount path stay meaningful.
    #[serde(rename = "vault_id")]
    pub lease_id: String,

    /// Non-empty iff the lease came from a login flow; revocation then
    /// cascades through the token store instead of the backend router.
    #[serde(default)]
    pub login_token: String,

    /// Backend path that produced the secret; revoke/renew dispatch target.
    pub path: String,

    /// Opaque payload carried back to the backend on revoke and renew.
    #[serde(default)]
    pub data: Map<String, Value>,

    /// Secret descriptor; its `lease_id` slot is stamped by the manager.
    pub secret: Secret,

    /// When the lease was issued.
    pub issue_time: DateTime<Utc>,

    /// When the lease expires; `None` for non-expiring leases.
    #[serde(default)]
    pub expire_time: Option<DateTime<Utc>>,

    /// Fields written by newer versions that this one does not recognize.
    /// They survive a decode/encode cycle untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LeaseEntry {
    /// Encode the entry for storage.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode an entry previously produced by [`LeaseEntry::encode`].
    pub fn decode(buf: &[u8]) -> Result<LeaseEntry, serde_json::Error> {
        serde_json::from_slice(buf)
    }
}
