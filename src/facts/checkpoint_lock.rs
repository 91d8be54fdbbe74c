//! Single-writer ownership of a checkpoint directory.
//!
//! The lock file carries the process that holds it, so a run that finds the directory busy
//! can say who it is waiting for.

use crate::Result;
use chrono::{DateTime, Utc};
use core::fmt::{Display, Formatter};
use fs4::fs_std::FileExt;
use ohno::IntoAppError;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Log target for `checkpoint_lock`
const LOG_TARGET: &str = "checkpoint";

/// Name of the lock file inside the checkpoint directory.
pub const LOCK_FILE_NAME: &str = "checkpoints.lock";

/// The run that owns a checkpoint directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

impl LockHolder {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            started_at: Utc::now(),
        }
    }
}

impl Display for LockHolder {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "process {} (since {})", self.pid, self.started_at.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

/// Result of a non-blocking attempt to take the lock.
#[derive(Debug)]
pub enum TryLock {
    Acquired(CheckpointLock),

    /// Someone else has it. The holder is unknown when the lock file can't be read.
    Held(Option<LockHolder>),
}

/// Exclusive advisory lock on a checkpoint directory, released when dropped.
#[derive(Debug)]
pub struct CheckpointLock {
    file: File,
    path: PathBuf,
}

impl CheckpointLock {
    /// Take the lock if no other run holds it.
    pub fn try_acquire(dir: &Path) -> Result<TryLock> {
        let (file, path) = open_lock_file(dir)?;

        let acquired = file
            .try_lock_exclusive()
            .into_app_err_with(|| format!("locking '{}'", path.display()))?;

        if !acquired {
            return Ok(TryLock::Held(read_holder(&file)));
        }

        let mut lock = Self { file, path };
        lock.record_holder()?;
        Ok(TryLock::Acquired(lock))
    }

    /// Take the lock, waiting for whichever run holds it to finish.
    pub async fn acquire(dir: &Path) -> Result<Self> {
        let holder = match Self::try_acquire(dir)? {
            TryLock::Acquired(lock) => return Ok(lock),
            TryLock::Held(holder) => holder,
        };

        match &holder {
            Some(holder) => log::warn!(
                target: LOG_TARGET,
                "Checkpoint directory '{}' is in use by {holder}, waiting for it to finish",
                dir.display()
            ),
            None => log::warn!(
                target: LOG_TARGET,
                "Checkpoint directory '{}' is in use by another run, waiting for it to finish",
                dir.display()
            ),
        }

        let (file, path) = open_lock_file(dir)?;

        // the other run may take a long time, so block off the async runtime
        let file = tokio::task::spawn_blocking(move || {
            file.lock_exclusive().into_app_err("waiting for the checkpoint lock")?;
            Ok::<_, ohno::AppError>(file)
        })
        .await
        .into_app_err("lock task panicked")??;

        let mut lock = Self { file, path };
        lock.record_holder()?;
        Ok(lock)
    }

    fn record_holder(&mut self) -> Result<()> {
        let holder = LockHolder::current();

        self.file.set_len(0).into_app_err("truncating lock file")?;
        let _ = self.file.seek(SeekFrom::Start(0)).into_app_err("rewinding lock file")?;
        serde_json::to_writer(&mut self.file, &holder).into_app_err("writing lock holder")?;
        self.file.flush().into_app_err("writing lock holder")?;

        log::debug!(target: LOG_TARGET, "Acquired checkpoint lock at '{}' as {holder}", self.path.display());
        Ok(())
    }
}

impl Drop for CheckpointLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            log::warn!(target: LOG_TARGET, "Could not unlock '{}': {e:#}", self.path.display());
        }
    }
}

fn open_lock_file(dir: &Path) -> Result<(File, PathBuf)> {
    let path = dir.join(LOCK_FILE_NAME);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .into_app_err_with(|| format!("opening checkpoint lock file at '{}'", path.display()))?;

    Ok((file, path))
}

fn read_holder(file: &File) -> Option<LockHolder> {
    serde_json::from_reader(file).ok()
}
