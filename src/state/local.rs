//! Local file-based state storage backend.
//!
//! State lives in one JSON file per stack and environment, written through a
//! temporary file and an atomic rename. The lock is a sibling JSON file.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Result, StateError};

use super::lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::{StackState, STATE_VERSION};

/// Default state directory name.
pub const STATE_DIR: &str = ".stackweave";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a store for a stack under a base directory, one file per
    /// stack and environment.
    #[must_use]
    pub fn for_stack(base_dir: impl Into<PathBuf>, stack: &str, environment: &str) -> Self {
        let base_dir = base_dir.into();
        let state_path = base_dir.join(format!("{stack}.{environment}.json"));
        Self::with_state_path(state_path)
    }

    /// Creates a store from an explicit state file path.
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let base_dir = state_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let lock_path = state_path.with_extension("lock");

        Self {
            base_dir,
            state_path,
            lock_path,
        }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                StateError::storage(format!("Failed to create state directory: {e}"))
            })?;
        }
        Ok(())
    }

    /// Writes `content` to `path` through a temporary file and a rename.
    async fn write_atomic(&self, path: &Path, content: &str) -> Result<()> {
        self.ensure_dir().await?;
        let mut temp_path = path.as_os_str().to_owned();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::storage(format!("Failed to create temp file: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::storage(format!("Failed to write temp file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::storage(format!("Failed to sync temp file: {e}")))?;

        fs::rename(&temp_path, path)
            .await
            .map_err(|e| StateError::storage(format!("Failed to rename temp file: {e}")))?;
        Ok(())
    }

    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        read_json(&self.lock_path, "lock").await
    }

    async fn delete_lock_file(&self) -> Result<()> {
        remove_if_present(&self.lock_path)
            .await
            .map_err(|e| StateError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            })?;
        Ok(())
    }
}

/// Reads and parses a JSON file. A missing file is `None`; anything
/// unreadable or unparsable is corruption.
async fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<Option<T>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StateError::Corrupted {
                message: format!("Cannot read {what} file {}: {e}", path.display()),
            }
            .into());
        }
    };

    serde_json::from_str(&content).map(Some).map_err(|e| {
        StateError::Corrupted {
            message: format!("Cannot parse {what} file {}: {e}", path.display()),
        }
        .into()
    })
}

/// Removes a file, treating an absent one as already removed. Returns
/// whether a file was deleted.
async fn remove_if_present(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<StackState>> {
        let Some(state) = read_json::<StackState>(&self.state_path, "state").await? else {
            debug!("No state at {}", self.state_path.display());
            return Ok(None);
        };
        debug!(
            "Loaded state from {} ({} resources)",
            self.state_path.display(),
            state.len()
        );

        if state.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: state.version,
            }
            .into());
        }

        Ok(Some(state))
    }

    async fn save(&self, state: &StackState) -> Result<()> {
        info!("Saving state to: {}", self.state_path.display());

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;
        self.write_atomic(&self.state_path, &content).await?;

        debug!("State saved ({} resources)", state.len());
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        let removed = remove_if_present(&self.state_path)
            .await
            .map_err(|e| StateError::storage(format!("Failed to delete state file: {e}")))?;
        if removed {
            info!("Deleted state file {}", self.state_path.display());
        }
        self.delete_lock_file().await
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
            warn!("Expired lock held by {} found, taking over", existing.holder);
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id, operation);
        let content = serde_json::to_string_pretty(&lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;
        self.write_atomic(&self.lock_path, &content)
            .await
            .map_err(|e| StateError::LockFailed {
                message: e.to_string(),
            })?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock_file().await? {
            Some(held) if held.lock_id == lock_id => {
                self.delete_lock_file().await?;
                info!("Released state lock {lock_id}");
            }
            Some(held) => debug!("Not releasing {lock_id}: lock now belongs to {}", held.holder),
            None => debug!("Lock {lock_id} already gone"),
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<Option<LockInfo>> {
        let existing = self.read_lock_file().await?;
        if let Some(lock) = &existing {
            warn!("Force-removing state lock {}", lock.lock_id);
            self.delete_lock_file().await?;
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
    use crate::error::StackweaveError;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::for_stack(temp_dir.path().join(STATE_DIR), "wordpress", "dev");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        let state = StackState::new("wordpress", "dev");
        store.save(&state).await.expect("Failed to save state");

        let loaded = store
            .load()
            .await
            .expect("Failed to load state")
            .expect("State should exist");

        assert_eq!(loaded.stack, "wordpress");
        assert_eq!(loaded.environment, "dev");
        assert!(store.state_path().ends_with("wordpress.dev.json"));
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();

        let result = store.load().await.expect("Load should not fail");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_garbage_state_file_is_corruption() {
        let (store, _temp) = create_test_store();
        fs::create_dir_all(store.state_path().parent().expect("parent"))
            .await
            .expect("create dir");
        fs::write(store.state_path(), "{ not json")
            .await
            .expect("write garbage");

        let err = store.load().await.expect_err("garbage");
        assert!(matches!(err, StackweaveError::State(StateError::Corrupted { .. })));
        assert!(err.to_string().contains("state file"));
    }

    #[tokio::test]
    async fn test_version_mismatch_is_rejected() {
        let (store, _temp) = create_test_store();

        let mut state = StackState::new("wordpress", "dev");
        state.version = String::from("0.1");
        store.save(&state).await.expect("Failed to save state");

        let err = store.load().await.expect_err("old version");
        assert!(matches!(
            err,
            StackweaveError::State(StateError::VersionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("test-holder", "apply")
            .await
            .expect("Failed to acquire lock");

        assert!(store.lock_info().await.expect("lock info").is_some());

        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");

        assert!(store.lock_info().await.expect("lock info").is_none());
    }

    #[tokio::test]
    async fn test_lock_conflict_and_force_unlock() {
        let (store, _temp) = create_test_store();

        let first = store
            .acquire_lock("holder-1", "apply")
            .await
            .expect("Failed to acquire first lock");

        let result = store.acquire_lock("holder-2", "apply").await;
        assert!(matches!(
            result,
            Err(StackweaveError::State(StateError::LockedByOther { .. }))
        ));

        let removed = store.force_unlock().await.expect("force unlock");
        assert_eq!(removed.map(|l| l.lock_id), Some(first.lock_id));
        store
            .acquire_lock("holder-2", "apply")
            .await
            .expect("lock is free again");
    }
}
