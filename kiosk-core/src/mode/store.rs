//! Persistence for [`KioskRuntimeState`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::KioskError;
use crate::mode::KioskRuntimeState;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// `Ok(None)` when nothing has been persisted yet.
    async fn load(&self) -> Result<Option<KioskRuntimeState>, KioskError>;

    async fn save(&self, state: &KioskRuntimeState) -> Result<(), KioskError>;
}

/// JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<Option<KioskRuntimeState>, KioskError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no persisted state");
                return Ok(None);
            }
            Err(e) => return Err(KioskError::Persistence(e.to_string())),
        };

        match serde_json::from_slice(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(path = %self.path.display(), "ignoring unreadable state file: {e}");
                Ok(None)
            }
        }
    }

    async fn save(&self, state: &KioskRuntimeState) -> Result<(), KioskError> {
        let json = serde_json::to_vec_pretty(state)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| KioskError::Persistence(e.to_string()))?;
            }
        }
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| KioskError::Persistence(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| KioskError::Persistence(e.to_string()))
    }
}

/// In-memory store for tests. Can be told to fail writes.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<KioskRuntimeState>>,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: KioskRuntimeState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            ..Default::default()
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn snapshot(&self) -> Option<KioskRuntimeState> {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<KioskRuntimeState>, KioskError> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, state: &KioskRuntimeState) -> Result<(), KioskError> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(KioskError::Persistence("store is read-only".into()));
        }
        *self.state.lock().await = Some(state.clone());
        Ok(())
    }
}
