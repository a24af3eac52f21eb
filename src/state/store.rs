//! State store trait definition.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::StateFile;
use crate::error::Result;

/// Persistent storage for the state file and its lock.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<StateFile>>;

    /// Loads the state, or an empty one if none exists.
    async fn load_or_default(&self) -> Result<StateFile> {
        Ok(self.load().await?.unwrap_or_default())
    }

    /// Saves the state atomically.
    async fn save(&self, state: &StateFile) -> Result<()>;

    /// Acquires the lock for `operation`.
    ///
    /// Fails with `LockedByOther` while an unexpired lock is held.
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Releases the lock if `lock_id` still owns it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes the lock regardless of its holder.
    async fn force_unlock(&self) -> Result<Option<LockInfo>>;

    /// Returns the current lock, if any.
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
