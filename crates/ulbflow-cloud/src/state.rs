//! On-disk record of applied attachments
//!
//! `.ulbflow/state.json` maps `lb_id/listener_id` to the last observed
//! [`AttachmentState`]. The listener stays authoritative: a stored entry only
//! tells the next apply what was declared before, and is refreshed against the
//! control plane before it is diffed.
//!
//! Writes land in a temporary file that is renamed over the state file, with
//! the previous file kept as `state.json.backup`. A lock file created with
//! `create_new` keeps two reconcilers off the same store.

use crate::attachment::AttachmentState;
use crate::error::{CloudError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const FORMAT_VERSION: u32 = 1;
const STORE_DIR: &str = ".ulbflow";
const STATE_FILE: &str = "state.json";
const STATE_TMP: &str = "state.json.tmp";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Contents of the state file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub attachments: BTreeMap<String, AttachmentState>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            updated_at: Utc::now(),
            attachments: BTreeMap::new(),
        }
    }
}

impl StateFile {
    pub fn get(&self, key: &str) -> Option<&AttachmentState> {
        self.attachments.get(key)
    }

    /// Store `state` under its own key, returning the entry it replaced
    pub fn upsert(&mut self, state: AttachmentState) -> Option<AttachmentState> {
        self.updated_at = Utc::now();
        self.attachments.insert(state.key(), state)
    }

    pub fn remove(&mut self, key: &str) -> Option<AttachmentState> {
        let removed = self.attachments.remove(key);
        if removed.is_some() {
            self.updated_at = Utc::now();
        }
        removed
    }
}

/// State directory of one project
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
    stale_after: chrono::Duration,
}

impl StateStore {
    /// Store under `<project_root>/.ulbflow`
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            dir: project_root.as_ref().join(STORE_DIR),
            stale_after: chrono::Duration::hours(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub async fn load(&self) -> Result<StateFile> {
        let content = match fs::read_to_string(self.path(STATE_FILE)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("No state file in {}, starting empty", self.dir.display());
                return Ok(StateFile::default());
            }
            Err(e) => return Err(e.into()),
        };

        let state: StateFile = serde_json::from_str(&content)?;
        if state.version > FORMAT_VERSION {
            return Err(CloudError::StateError(format!(
                "state format {} is newer than {}, upgrade ulbflow",
                state.version, FORMAT_VERSION
            )));
        }

        tracing::debug!("Loaded {} attachment(s) from state", state.attachments.len());
        Ok(state)
    }

    pub async fn save(&self, state: &StateFile) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let current = self.path(STATE_FILE);
        let tmp = self.path(STATE_TMP);
        fs::write(&tmp, serde_json::to_vec_pretty(state)?).await?;

        if fs::try_exists(&current).await? {
            fs::copy(&current, self.path(STATE_BACKUP)).await?;
        }
        fs::rename(&tmp, &current).await?;

        tracing::debug!("Saved {} attachment(s) to state", state.attachments.len());
        Ok(())
    }

    /// Take the store lock
    pub async fn lock(&self) -> Result<StateLock> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path(LOCK_FILE);
        let holder = LockHolder::current();

        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(&serde_json::to_vec(&holder)?).await?;
                    tracing::debug!("Locked {}", self.dir.display());
                    return Ok(StateLock { path, held: true });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let existing = fs::read_to_string(&path).await?;
                    match serde_json::from_str::<LockHolder>(&existing) {
                        Ok(other) if Utc::now() - other.acquired_at < self.stale_after => {
                            return Err(CloudError::LockError(format!(
                                "{} is locked by {} (pid {}) since {}",
                                self.dir.display(),
                                other.host,
                                other.pid,
                                other.acquired_at
                            )));
                        }
                        _ => {
                            tracing::warn!("Taking over stale lock {}", path.display());
                            fs::remove_file(&path).await?;
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CloudError::LockError(format!(
            "{} was locked again while taking over a stale lock",
            self.dir.display()
        )))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockHolder {
    host: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

impl LockHolder {
    fn current() -> Self {
        Self {
            host: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }
}

/// Held store lock; removed on [`StateLock::release`] or drop
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
    held: bool,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        self.held = false;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if self.held {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
