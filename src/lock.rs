// 🔒 Registry lock - one command at a time per state directory
//
// The lock file is created with create-new semantics and removed on drop.
// A second process finds the file and fails fast with Error::Locked.
// A crashed process leaves the file behind; the operator removes it.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = "registry.lock";

/// Contents of the lock file, so an operator can tell who holds it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub command: String,
}

#[derive(Debug)]
pub struct RegistryLock {
    path: PathBuf,
    info: LockInfo,
}

impl RegistryLock {
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        Self::acquire_for(state_dir, "donation-match")
    }

    /// Take the lock, recording `command` as the holder
    pub fn acquire_for(state_dir: &Path, command: &str) -> Result<Self> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(LOCK_FILE);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .ok()
                    .and_then(|text| serde_json::from_str::<LockInfo>(&text).ok())
                    .map(|info| {
                        format!(
                            "pid {} running '{}' since {}",
                            info.pid,
                            info.command,
                            info.acquired_at.to_rfc3339()
                        )
                    })
                    .unwrap_or_else(|| "unknown holder".to_string());
                return Err(Error::Locked(format!("{}: {}", path.display(), holder)));
            }
            Err(e) => return Err(e.into()),
        };

        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: Utc::now(),
            command: command.to_string(),
        };
        file.write_all(serde_json::to_string(&info)?.as_bytes())?;
        file.sync_all()?;

        tracing::debug!(path = %path.display(), pid = info.pid, "acquired registry lock");
        Ok(RegistryLock { path, info })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "could not remove registry lock");
        }
    }
}
