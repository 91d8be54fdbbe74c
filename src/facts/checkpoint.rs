//! Durable per-pair progress.
//!
//! Every (organization, identity) pair has its own JSON file under the checkpoint directory,
//! replaced atomically on each save. A crash can therefore leave behind at most a stray
//! temporary file, never a half-written entry.

use super::checkpoint_lock::{CheckpointLock, LOCK_FILE_NAME};
use super::{Cursor, Diagnostic, DiagnosticKind, Endpoint, TimeWindow, WindowSetting};
use crate::Result;
use crate::metrics::MetricTally;
use chrono::{DateTime, Utc};
use core::fmt::{Display, Formatter};
use ohno::{IntoAppError, app_err};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use strum::Display as StrumDisplay;

/// Log target for the checkpoint store
const LOG_TARGET: &str = "checkpoint";

const ENTRY_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";
const CORRUPT_EXTENSION: &str = "corrupt";

/// Identifies one unit of work: an identity within an organization.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub organization: String,
    pub identity: String,
}

impl PairKey {
    pub fn new(organization: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            identity: identity.into(),
        }
    }
}

impl Display for PairKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.identity, self.organization)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, StrumDisplay)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntryStatus {
    InProgress,
    Complete,
    Failed,
}

/// Persisted progress of one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub key: PairKey,

    /// How the window was configured when the pair started.
    #[serde(default)]
    pub window_setting: WindowSetting,

    /// The dates the tally is collected under.
    #[serde(default)]
    pub window: Option<TimeWindow>,

    /// Where to pick up; `None` once every endpoint has been walked.
    pub cursor: Option<Cursor>,
    pub tally: MetricTally,
    pub status: EntryStatus,

    /// Pages that could not be reached because an earlier page of the same endpoint was rejected.
    #[serde(default)]
    pub lost_pages: u32,

    #[serde(default)]
    pub pages_fetched: u64,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointEntry {
    /// A fresh entry positioned at the first page of the first endpoint.
    #[must_use]
    pub fn new(key: PairKey, window_setting: WindowSetting, window: Option<TimeWindow>, now: DateTime<Utc>) -> Self {
        Self {
            key,
            window_setting,
            window,
            cursor: Some(Cursor::start(Endpoint::first())),
            tally: MetricTally::default(),
            status: EntryStatus::InProgress,
            lost_pages: 0,
            pages_fetched: 0,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == EntryStatus::Complete
    }
}

/// What [`CheckpointStore::load`] found on disk.
#[derive(Debug, Default)]
pub struct LoadedCheckpoints {
    pub entries: BTreeMap<PairKey, CheckpointEntry>,

    /// One entry per unreadable file that was set aside.
    pub diagnostics: Vec<Diagnostic>,
}

/// Durable mapping from pair to checkpoint entry.
///
/// Holding a store means holding the directory's process lock. Saves of different entries
/// never contend; saves of the same entry are serialized.
#[derive(Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
    writers: Mutex<HashMap<PairKey, Arc<Mutex<()>>>>,
    _lock: CheckpointLock,
}

impl CheckpointStore {
    /// Open (creating if needed) the store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).into_app_err_with(|| format!("creating checkpoint directory '{}'", dir.display()))?;

        let lock = CheckpointLock::acquire(&dir).await?;
        log::debug!(target: LOG_TARGET, "Using checkpoint directory '{}'", dir.display());

        Ok(Self {
            dir,
            writers: Mutex::new(HashMap::new()),
            _lock: lock,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read every entry in the store.
    ///
    /// A file that cannot be parsed is renamed with a `.corrupt` suffix and reported, leaving
    /// the other entries untouched. Temporary files left over from an interrupted save are
    /// removed.
    pub fn load(&self) -> Result<LoadedCheckpoints> {
        let mut loaded = LoadedCheckpoints::default();

        for org_dir in read_dir_paths(&self.dir)? {
            if !org_dir.is_dir() {
                continue;
            }

            for path in read_dir_paths(&org_dir)? {
                match path.extension().and_then(|ext| ext.to_str()) {
                    Some(TEMP_EXTENSION) => {
                        log::debug!(target: LOG_TARGET, "Removing leftover temporary file '{}'", path.display());
                        if let Err(e) = fs::remove_file(&path) {
                            log::warn!(target: LOG_TARGET, "Could not remove '{}': {e:#}", path.display());
                        }
                    }

                    Some(ENTRY_EXTENSION) => match read_entry(&path) {
                        Ok(entry) => {
                            let _ = loaded.entries.insert(entry.key.clone(), entry);
                        }
                        Err(e) => loaded.diagnostics.push(quarantine(&path, &e)),
                    },

                    _ => {}
                }
            }
        }

        log::debug!(target: LOG_TARGET, "Loaded {} checkpoint entries", loaded.entries.len());
        Ok(loaded)
    }

    /// Read the durable entry for `key`, if there is one.
    pub fn get(&self, key: &PairKey) -> Result<Option<CheckpointEntry>> {
        let path = self.entry_path(key);
        match fs::read(&path) {
            Ok(bytes) => {
                let entry = serde_json::from_slice(&bytes)
                    .into_app_err_with(|| format!("parsing checkpoint '{}'", path.display()))?;
                Ok(Some(entry))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).into_app_err_with(|| format!("reading checkpoint '{}'", path.display())),
        }
    }

    /// Whether the durable entry for `key` is marked complete.
    pub fn is_complete(&self, key: &PairKey) -> Result<bool> {
        Ok(self.get(key)?.is_some_and(|entry| entry.is_complete()))
    }

    /// Atomically replace the durable entry for `entry.key`.
    ///
    /// Saving the same entry twice leaves the same bytes on disk.
    pub fn save(&self, entry: &CheckpointEntry) -> Result<()> {
        self.write_entry(&entry.key, |writer| {
            serde_json::to_writer_pretty(&mut *writer, entry).into_app_err("serializing checkpoint entry")?;
            writer.write_all(b"\n").into_app_err("writing checkpoint entry")
        })
    }

    /// Remove the durable entry for `key`, if any.
    pub fn reset(&self, key: &PairKey) -> Result<()> {
        let writer = self.writer_for(key);
        let _guard = writer.lock().expect("lock not poisoned");

        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                log::debug!(target: LOG_TARGET, "Reset checkpoint for {key}");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).into_app_err_with(|| format!("removing checkpoint '{}'", path.display())),
        }
    }

    /// Remove every entry in the store, returning how many there were.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;

        for path in read_dir_paths(&self.dir)? {
            if path.is_dir() {
                let count = read_dir_paths(&path)?
                    .iter()
                    .filter(|p| p.extension().and_then(|ext| ext.to_str()) == Some(ENTRY_EXTENSION))
                    .count();

                fs::remove_dir_all(&path).into_app_err_with(|| format!("removing '{}'", path.display()))?;
                removed += count;
            } else if path.file_name().and_then(|n| n.to_str()) != Some(LOCK_FILE_NAME) {
                fs::remove_file(&path).into_app_err_with(|| format!("removing '{}'", path.display()))?;
            }
        }

        Ok(removed)
    }

    /// Write an entry through `write`, replacing the previous one only if `write` succeeds.
    pub(crate) fn write_entry<F>(&self, key: &PairKey, write: F) -> Result<()>
    where
        F: FnOnce(&mut BufWriter<fs::File>) -> Result<()>,
    {
        let writer = self.writer_for(key);
        let _guard = writer.lock().expect("lock not poisoned");

        let path = self.entry_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).into_app_err_with(|| format!("creating '{}'", parent.display()))?;
        }

        write_atomically(&path, write)
    }

    fn writer_for(&self, key: &PairKey) -> Arc<Mutex<()>> {
        let mut writers = self.writers.lock().expect("lock not poisoned");
        Arc::clone(writers.entry(key.clone()).or_default())
    }

    fn entry_path(&self, key: &PairKey) -> PathBuf {
        self.dir
            .join(sanitize(&key.organization))
            .join(format!("{}.{ENTRY_EXTENSION}", sanitize(&key.identity)))
    }
}

/// Write to a temporary sibling of `path`, flush it to disk, then rename it into place.
fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<fs::File>) -> Result<()>,
{
    let temp_path = path.with_extension(TEMP_EXTENSION);

    let result = write_durably(&temp_path, write)
        .and_then(|()| fs::rename(&temp_path, path).into_app_err_with(|| format!("moving '{}' into place", temp_path.display())));

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }

    result
}

fn write_durably<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<fs::File>) -> Result<()>,
{
    let file = fs::File::create(path).into_app_err_with(|| format!("creating '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);
    write(&mut writer)?;

    let file = writer
        .into_inner()
        .map_err(|e| app_err!("flushing '{}': {}", path.display(), e.error()))?;
    file.sync_all().into_app_err_with(|| format!("syncing '{}'", path.display()))
}

fn read_entry(path: &Path) -> Result<CheckpointEntry> {
    let bytes = fs::read(path).into_app_err_with(|| format!("reading checkpoint '{}'", path.display()))?;
    serde_json::from_slice(&bytes).into_app_err_with(|| format!("parsing checkpoint '{}'", path.display()))
}

/// Move an unreadable entry out of the way so that only it is lost.
fn quarantine(path: &Path, error: &ohno::AppError) -> Diagnostic {
    let mut target = path.as_os_str().to_owned();
    target.push(".");
    target.push(CORRUPT_EXTENSION);

    log::warn!(target: LOG_TARGET, "Discarding unreadable checkpoint '{}': {error:#}", path.display());
    if let Err(e) = fs::rename(path, &target) {
        log::warn!(target: LOG_TARGET, "Could not set aside '{}': {e:#}", path.display());
    }

    Diagnostic::general(
        DiagnosticKind::CheckpointCorruption,
        format!("discarded unreadable checkpoint '{}': {error}", path.display()),
    )
}

fn read_dir_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).into_app_err_with(|| format!("reading directory '{}'", dir.display()))? {
        paths.push(entry.into_app_err_with(|| format!("reading directory '{}'", dir.display()))?.path());
    }

    paths.sort();
    Ok(paths)
}

/// Make a name safe to use as a single path component.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
