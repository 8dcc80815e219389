//! Lock record data model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lock status as persisted in the `status` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockStatus {
    /// Lock is available; owner and thread are cleared
    #[default]
    Free,
    /// Lock is held by an owner
    Running,
    /// Lock is held, but release has been requested
    Abort,
}

impl LockStatus {
    pub const ALL: [LockStatus; 3] = [LockStatus::Free, LockStatus::Running, LockStatus::Abort];

    /// Statuses that count as "held"
    pub const HELD: [LockStatus; 2] = [LockStatus::Running, LockStatus::Abort];

    pub fn as_str(&self) -> &'static str {
        match self {
            LockStatus::Free => "FREE",
            LockStatus::Running => "RUNNING",
            LockStatus::Abort => "ABORT",
        }
    }

    pub fn is_held(&self) -> bool {
        !matches!(self, LockStatus::Free)
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored status string is not one of `FREE`, `RUNNING`, `ABORT`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown lock status '{0}'")]
pub struct UnknownLockStatus(pub String);

impl FromStr for LockStatus {
    type Err = UnknownLockStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FREE" => Ok(LockStatus::Free),
            "RUNNING" => Ok(LockStatus::Running),
            "ABORT" => Ok(LockStatus::Abort),
            other => Err(UnknownLockStatus(other.to_string())),
        }
    }
}

/// One persisted lock row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// Application-chosen lock key
    pub key: String,
    /// Current status
    pub status: LockStatus,
    /// Cluster node holding (or last holding) the lock, `None` when free
    pub owner: Option<String>,
    /// Name of the holder within the owning node, `None` when free
    pub thread: Option<String>,
    /// When the current acquisition began (epoch millis)
    pub lock_time: i64,
    /// Lease end (epoch millis)
    pub expiration_time: i64,
    /// Last refresh or state transition (epoch millis)
    pub last_modified: i64,
}

impl LockRecord {
    /// Build a freshly acquired record from a claim
    pub fn from_claim(claim: &LockClaim) -> Self {
        Self {
            key: claim.key.clone(),
            status: LockStatus::Running,
            owner: Some(claim.owner.clone()),
            thread: Some(claim.thread.clone()),
            lock_time: claim.now,
            expiration_time: claim.expires_at,
            last_modified: claim.now,
        }
    }

    pub fn is_held(&self) -> bool {
        self.status.is_held()
    }

    /// Whether the lease has elapsed at `now`
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.is_held() && self.expiration_time < now
    }

    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.is_held() && self.owner.as_deref() == Some(owner)
    }

    /// Transition to `FREE`, clearing owner and thread
    pub fn free(&mut self, now: i64) {
        self.status = LockStatus::Free;
        self.owner = None;
        self.thread = None;
        self.last_modified = now;
    }
}

impl fmt::Display for LockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] owner={} thread={}",
            self.key,
            self.status,
            self.owner.as_deref().unwrap_or("-"),
            self.thread.as_deref().unwrap_or("-")
        )
    }
}

/// An acquisition attempt handed to a lock store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockClaim {
    pub key: String,
    /// Cluster node id of the claimant
    pub owner: String,
    /// Holder name within the claimant node
    pub thread: String,
    /// Claim time (epoch millis)
    pub now: i64,
    /// Initial lease end (epoch millis)
    pub expires_at: i64,
}
