use super::storage::{IdentityStore, USER_ID_KEY};
use crate::error::{ChatError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Keeps the user id as a plain file under the cache directory.
pub struct FilesystemIdentityStore {
    dir: PathBuf,
}

impl FilesystemIdentityStore {
    /// `~/.cache/agentchat`
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| ChatError::IdentityError("cannot determine home directory".into()))?;
        Ok(Self::in_dir(home.join(".cache").join("agentchat")))
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn key_path(&self) -> PathBuf {
        self.dir.join(USER_ID_KEY)
    }

    fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

impl IdentityStore for FilesystemIdentityStore {
    fn load_user_id(&self) -> Option<String> {
        let content = fs::read_to_string(self.key_path()).ok()?;
        let user_id = content.trim();
        if user_id.is_empty() {
            None
        } else {
            Some(user_id.to_string())
        }
    }

    fn save_user_id(&self, user_id: &str) -> Result<()> {
        Self::ensure_dir(&self.dir)?;
        fs::write(self.key_path(), user_id)?;
        Ok(())
    }

    fn clear_user_id(&self) -> Result<()> {
        let path = self.key_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Process-local store, for tests and for running without a writable home.
#[derive(Default)]
pub struct MemoryIdentityStore {
    user_id: Mutex<Option<String>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_id(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Mutex::new(Some(user_id.into())),
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load_user_id(&self) -> Option<String> {
        self.user_id.lock().ok()?.clone()
    }

    fn save_user_id(&self, user_id: &str) -> Result<()> {
        let mut slot = self
            .user_id
            .lock()
            .map_err(|_| ChatError::IdentityError("identity store lock poisoned".into()))?;
        *slot = Some(user_id.to_string());
        Ok(())
    }

    fn clear_user_id(&self) -> Result<()> {
        let mut slot = self
            .user_id
            .lock()
            .map_err(|_| ChatError::IdentityError("identity store lock poisoned".into()))?;
        *slot = None;
        Ok(())
    }
}
