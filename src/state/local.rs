//! Local file-based state storage backend.
//!
//! The state lives in a single JSON file, written through a temporary file
//! and renamed into place. The lock is a sibling `state.lock` file created
//! exclusively, so two processes cannot both take it.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_STATE_PATH;
use crate::error::{ConvergeError, Result, StateError};

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::{StateFile, STATE_VERSION};

/// Lock file name, next to the state file.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl Default for LocalStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_PATH)
    }
}

impl LocalStateStore {
    /// Creates a store for the given state file.
    #[must_use]
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let lock_path = state_path
            .parent()
            .map_or_else(|| PathBuf::from(LOCK_FILE), |dir| dir.join(LOCK_FILE));

        Self {
            state_path,
            lock_path,
        }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await.map_err(|e| {
                StateError::write(format!("Failed to create {}: {e}", dir.display()))
            })?;
        }
        Ok(())
    }

    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(&self.lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StateError::LockFailed {
                    message: format!("Failed to read lock file: {e}"),
                }
                .into());
            }
        };

        let lock: LockInfo = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse lock file: {e}"),
        })?;
        Ok(Some(lock))
    }

    /// Creates the lock file, failing if it already exists.
    async fn create_lock_file(&self, lock: &LockInfo) -> Result<bool> {
        Self::ensure_parent(&self.lock_path).await?;
        let content = serde_json::to_string_pretty(lock)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                return Err(StateError::LockFailed {
                    message: format!("Failed to create lock file: {e}"),
                }
                .into());
            }
        };

        file.write_all(content.as_bytes())
            .await
            .and(file.sync_all().await)
            .map_err(|e| StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })?;
        Ok(true)
    }

    async fn remove_lock_file(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            }
            .into()),
        }
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<StateFile>> {
        let content = match fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("State file does not exist: {}", self.state_path.display());
                return Ok(None);
            }
            Err(e) => return Err(ConvergeError::Io(e)),
        };

        debug!("Loading state from: {}", self.state_path.display());
        let state: StateFile = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse {}: {e}", self.state_path.display()),
        })?;

        if state.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: state.version,
            }
            .into());
        }

        Ok(Some(state))
    }

    async fn save(&self, state: &StateFile) -> Result<()> {
        Self::ensure_parent(&self.state_path).await?;
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        let temp_path = self.state_path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to create temp state file: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .and(file.sync_all().await)
            .map_err(|e| StateError::write(format!("Failed to write state file: {e}")))?;
        drop(file);

        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to rename state file: {e}")))?;

        debug!(
            "Saved {} record(s) to {}",
            state.resources.len(),
            self.state_path.display()
        );
        Ok(())
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        let lock = LockInfo::new(holder, operation);

        if self.create_lock_file(&lock).await? {
            info!("Acquired state lock {} for {operation}", lock.lock_id);
            return Ok(lock);
        }

        match self.read_lock_file().await? {
            Some(existing) if !existing.is_expired() => Err(StateError::LockedByOther {
                holder: existing.holder,
                since: existing.acquired_at.to_rfc3339(),
            }
            .into()),
            stale => {
                if let Some(stale) = stale {
                    warn!("Taking over expired lock held by {}", stale.holder);
                }
                self.remove_lock_file().await?;
                if self.create_lock_file(&lock).await? {
                    info!("Acquired state lock {} for {operation}", lock.lock_id);
                    Ok(lock)
                } else {
                    Err(StateError::LockFailed {
                        message: String::from("lock was taken concurrently"),
                    }
                    .into())
                }
            }
        }
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock_file().await? {
            Some(existing) if existing.lock_id == lock_id => {
                self.remove_lock_file().await?;
                info!("Released state lock: {lock_id}");
            }
            Some(existing) => {
                warn!(
                    "Not releasing lock {}: it is held by {}",
                    existing.lock_id, existing.holder
                );
            }
            None => debug!("Lock {lock_id} already released"),
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<Option<LockInfo>> {
        let existing = self.read_lock_file().await.unwrap_or(None);
        self.remove_lock_file().await?;
        if let Some(lock) = &existing {
            warn!("Force-released state lock held by {}", lock.holder);
        }
        Ok(existing)
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{LocalState, ResourceIdentifier, StatusTag};
    use crate::state::ResourceRecord;
    use tempfile::TempDir;

    fn store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::new(temp_dir.path().join("nested").join("state.json"));
        (store, temp_dir)
    }

    fn record(name: &str) -> ResourceRecord {
        let state = LocalState {
            id: ResourceIdentifier::new(format!("arn:{name}")),
            status: StatusTag::Available,
            attributes: crate::client::Attributes::new(),
        };
        ResourceRecord::applied(name, "table", &state, "hash")
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = store();
        assert!(store.load().await.expect("load").is_none());

        let mut state = StateFile::new();
        state.upsert(record("orders"));
        store.save(&state).await.expect("Failed to save state");

        let loaded = store.load().await.expect("load").expect("State should exist");
        assert_eq!(loaded, state);
        assert!(!store.state_path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_version_mismatch_is_rejected() {
        let (store, _temp) = store();
        let mut state = StateFile::new();
        state.version = String::from("0");
        store.save(&state).await.expect("Failed to save state");

        let err = store.load().await.expect_err("old version");
        assert!(matches!(
            err,
            ConvergeError::State(StateError::VersionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_corrupted_state() {
        let (store, _temp) = store();
        LocalStateStore::ensure_parent(store.state_path()).await.expect("dir");
        fs::write(store.state_path(), "{not json").await.expect("write");

        let err = store.load().await.expect_err("corrupted");
        assert!(matches!(err, ConvergeError::State(StateError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_lock_acquire_conflict_release() {
        let (store, _temp) = store();

        let lock = store.acquire_lock("holder-1", "apply").await.expect("first lock");
        let err = store
            .acquire_lock("holder-2", "destroy")
            .await
            .expect_err("already locked");
        assert!(matches!(
            err,
            ConvergeError::State(StateError::LockedByOther { ref holder, .. }) if holder == "holder-1"
        ));

        store.release_lock("someone-else").await.expect("mismatch is not an error");
        assert!(store.lock_info().await.expect("info").is_some());

        store.release_lock(&lock.lock_id).await.expect("release");
        assert!(store.lock_info().await.expect("info").is_none());
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let (store, _temp) = store();
        let stale = LockInfo::with_expiry("crashed", "apply", chrono::Duration::seconds(-5));
        assert!(store.create_lock_file(&stale).await.expect("create"));

        let lock = store.acquire_lock("holder-2", "apply").await.expect("takes over");
        assert_eq!(lock.holder, "holder-2");
    }

    #[tokio::test]
    async fn test_force_unlock() {
        let (store, _temp) = store();
        store.acquire_lock("holder-1", "apply").await.expect("lock");

        let removed = store.force_unlock().await.expect("unlock");
        assert_eq!(removed.map(|l| l.holder), Some(String::from("holder-1")));
        assert!(store.force_unlock().await.expect("idempotent").is_none());
    }
}
