//! Advisory lock guarding the state file.
//!
//! Only one reconciliation may mutate state at a time. The lock is a small
//! JSON document naming its holder; it expires so a crashed run does not
//! block the next one forever.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default lock lifetime in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 30 * 60;

/// Information about a held state lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Unique lock identifier, required to release the lock.
    pub lock_id: String,
    /// Process holding the lock (`hostname-pid-nonce`).
    pub holder: String,
    /// Command that took the lock.
    pub operation: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock lapses.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a lock for `holder` running `operation`.
    #[must_use]
    pub fn new(holder: &str, operation: &str) -> Self {
        Self::with_expiry(holder, operation, Duration::seconds(LOCK_EXPIRY_SECS))
    }

    /// Creates a lock with a custom lifetime.
    #[must_use]
    pub fn with_expiry(holder: &str, operation: &str, lifetime: Duration) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            operation: operation.to_string(),
            acquired_at: now,
            expires_at: now + lifetime,
        }
    }

    /// Checks if the lock has lapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Checks if the lock has lapsed at the given instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Returns the remaining lifetime in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} held by {} since {} (expires {})",
            self.operation,
            self.holder,
            self.acquired_at.to_rfc3339(),
            self.expires_at.to_rfc3339()
        )
    }
}

/// Builds a holder identifier for the current process.
#[must_use]
pub fn holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());
    let pid = std::process::id();
    let nonce = Uuid::new_v4().simple().to_string();

    format!("{hostname}-{pid}-{}", &nonce[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_expiry() {
        let lock = LockInfo::new("host-1-abc", "apply");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > 0);
        assert!(lock.is_expired_at(lock.expires_at));

        let lapsed = LockInfo::with_expiry("host-1-abc", "apply", Duration::seconds(-1));
        assert!(lapsed.is_expired());
        assert_eq!(lapsed.remaining_secs(), 0);
    }

    #[test]
    fn test_holder_ids_are_unique_per_call() {
        let first = holder_id();
        let second = holder_id();

        assert_ne!(first, second);
        assert!(first.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_display_names_operation_and_holder() {
        let lock = LockInfo::new("ci-runner-42-deadbeef", "destroy");
        let text = lock.to_string();
        assert!(text.starts_with("destroy held by ci-runner-42-deadbeef"));
    }
}
