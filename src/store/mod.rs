//! Process-wide configuration tree.
//!
//! The [`ConfigStore`] holds the whole configuration as one
//! `serde_value::Value` tree, persisted as TOML. Reads come from the
//! in-memory copy and never block. Writes go through
//! [`ConfigStore::with_write_lock`], which serializes writers across
//! processes with an advisory file lock, persists the entire tree, records
//! an audit entry and marks the affected subsystem dirty.
//!
//! # Example
//!
//! ```rust,no_run
//! use config_model::{ChangeNote, ConfigStore, StoreOptions};
//! use serde_value::Value;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ConfigStore::open(StoreOptions::new("/var/lib/myapp/config.toml"))?;
//!
//! store.set(
//!     "system/hostname",
//!     Value::String("fw1".into()),
//!     &ChangeNote::new("Renamed host").subsystem("system"),
//! )?;
//!
//! assert!(store.is_dirty("system"));
//! # Ok(())
//! # }
//! ```

pub(crate) mod atomic;
pub mod tree;

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use chrono::Utc;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use serde_value::Value;
use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    identity::Client,
};
use atomic::{AtomicFile, FileLock, Fingerprint};

/// Tuning for a [`ConfigStore`].
///
/// Loadable from TOML:
///
/// ```toml
/// path = "/var/lib/myapp/config.toml"
/// lock_attempts = 60
/// lock_interval_ms = 1000
/// audit_limit = 256
/// dirty_dir = "/var/run/myapp"
/// ```
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(pattern = "owned")]
#[serde(default)]
pub struct StoreOptions {
    /// TOML file holding the tree.
    #[builder(setter(into))]
    pub path: PathBuf,

    /// How many times a writer polls for the lock before giving up.
    #[builder(default = "60")]
    pub lock_attempts: u32,

    #[builder(default = "1000")]
    pub lock_interval_ms: u64,

    /// Audit entries kept in memory per handle.
    #[builder(default = "256")]
    pub audit_limit: usize,

    /// Where `<subsystem>.dirty` markers live. Defaults to a `dirty`
    /// directory next to the config file.
    #[builder(default, setter(into, strip_option))]
    pub dirty_dir: Option<PathBuf>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new("config.toml")
    }
}

impl StoreOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_attempts: 60,
            lock_interval_ms: 1000,
            audit_limit: 256,
            dirty_dir: None,
        }
    }

    pub fn builder() -> StoreOptionsBuilder {
        StoreOptionsBuilder::default()
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn dirty_dir(&self) -> PathBuf {
        self.dirty_dir.clone().unwrap_or_else(|| {
            self.path
                .parent()
                .unwrap_or(Path::new("."))
                .join("dirty")
        })
    }
}

/// What a write is for and who makes it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNote {
    pub note: String,
    pub client: Client,
    /// Subsystem to mark dirty once the write is committed.
    pub subsystem: Option<String>,
}

impl ChangeNote {
    pub fn new(note: impl Into<String>) -> Self {
        Self {
            note: note.into(),
            client: Client::system(),
            subsystem: None,
        }
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = Some(subsystem.into());
        self
    }
}

/// One committed write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    /// Unix seconds.
    pub time: i64,
    pub note: String,
    pub username: String,
    pub ip_address: String,
}

struct StoreState {
    tree: Value,
    fingerprint: Option<Fingerprint>,
    audit: Vec<AuditEntry>,
}

pub struct ConfigStore {
    options: StoreOptions,
    file: AtomicFile,
    state: RwLock<StoreState>,
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ConfigStore {
    /// Opens the store, loading the tree if the file exists.
    ///
    /// A missing file is an empty tree; nothing is written until the first
    /// change.
    pub fn open(options: StoreOptions) -> Result<Self> {
        let file = AtomicFile::new(options.path.clone());
        let (tree, fingerprint) = Self::load_tree(&file)?;

        info!(path = %file.path().display(), "config store opened");

        Ok(Self {
            options,
            file,
            state: RwLock::new(StoreState {
                tree,
                fingerprint,
                audit: Vec::new(),
            }),
        })
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    fn load_tree(file: &AtomicFile) -> Result<(Value, Option<Fingerprint>)> {
        let fingerprint = file.fingerprint();
        let tree = match file.read()? {
            Some(contents) => tree::from_persisted(toml::from_str::<Value>(&contents)?),
            None => tree::empty(),
        };
        Ok((tree, fingerprint))
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-reads the tree from disk, picking up other writers' changes.
    pub fn reload(&self) -> Result<()> {
        let (tree, fingerprint) = Self::load_tree(&self.file)?;
        let mut state = self.write_state();
        state.tree = tree;
        state.fingerprint = fingerprint;
        Ok(())
    }

    /// Snapshot of the whole tree.
    pub fn tree(&self) -> Value {
        self.read_state().tree.clone()
    }

    /// Value at `path`, or `default` when absent or blank.
    pub fn get(&self, path: &str, default: Value) -> Value {
        match self.get_opt(path) {
            Some(value) if !tree::is_blank(&value) => value,
            _ => default,
        }
    }

    pub fn get_opt(&self, path: &str) -> Option<Value> {
        tree::get(&self.read_state().tree, path).cloned()
    }

    /// Whether the toggle `key` exists under `path`. The stored value is
    /// ignored.
    pub fn enabled(&self, path: &str, key: &str) -> bool {
        matches!(tree::get(&self.read_state().tree, path), Some(Value::Map(map)) if map.contains_key(&tree::key(key)))
    }

    pub fn set(&self, path: &str, value: Value, change: &ChangeNote) -> Result<()> {
        self.with_write_lock(change, |tree| tree::set(tree, path, value))
    }

    /// Removes the node at `path` and returns it.
    pub fn delete(&self, path: &str, change: &ChangeNote) -> Result<Option<Value>> {
        self.with_write_lock(change, |tree| Ok(tree::remove(tree, path)))
    }

    /// Reloads the tree if the file changed since this handle last read or
    /// wrote it. Returns whether anything was reloaded.
    pub fn refresh(&self) -> Result<bool> {
        let known = self.read_state().fingerprint;
        let on_disk = self.file.fingerprint();
        if on_disk.is_none() || on_disk == known {
            return Ok(false);
        }

        debug!(path = %self.file.path().display(), "config changed on disk, reloading");
        self.reload()?;
        Ok(true)
    }

    /// Runs a read-modify-write cycle under the exclusive config lock.
    ///
    /// The tree is refreshed from disk once the lock is held, and the
    /// closure works on a copy of it. Reads through this store from inside
    /// the closure see the same refreshed tree, so checks made there cannot
    /// race other writers. The closure must not start another write.
    ///
    /// When the closure returns `Ok`, the copy is persisted in full, becomes
    /// the live tree, gets an audit entry and marks `change.subsystem` dirty.
    /// When it returns `Err`, nothing is written. If the lock cannot be
    /// acquired the closure never runs.
    pub fn with_write_lock<T, F>(&self, change: &ChangeNote, f: F) -> Result<T>
    where
        F: FnOnce(&mut Value) -> Result<T>,
    {
        let _lock = FileLock::acquire(
            &self.options.lock_path(),
            self.options.lock_attempts,
            Duration::from_millis(self.options.lock_interval_ms),
        )?;

        self.refresh()?;

        let mut working = self.tree();
        let output = f(&mut working)?;

        let entry = AuditEntry {
            time: Utc::now().timestamp(),
            note: change.note.clone(),
            username: change.client.username.clone(),
            ip_address: change.client.ip_address.clone(),
        };
        stamp_revision(&mut working, &entry)?;

        let contents = toml::to_string_pretty(&tree::to_persisted(&working))?;
        self.file.write(&contents)?;

        {
            let mut state = self.write_state();
            state.tree = working;
            state.fingerprint = self.file.fingerprint();
            state.audit.push(entry);
            let excess = state.audit.len().saturating_sub(self.options.audit_limit);
            state.audit.drain(..excess);
        }

        // the write is committed; a missing marker must not report it as failed
        if let Some(subsystem) = &change.subsystem {
            if let Err(err) = self.mark_dirty(subsystem) {
                warn!(subsystem = %subsystem, error = %err, "config written but subsystem not marked dirty");
            }
        }

        info!(
            note = %change.note,
            username = %change.client.username,
            subsystem = ?change.subsystem,
            "config written"
        );

        Ok(output)
    }

    /// Committed writes made through this handle, oldest first. Only the
    /// latest `audit_limit` entries are kept.
    pub fn audit_trail(&self) -> Vec<AuditEntry> {
        self.read_state().audit.clone()
    }

    fn dirty_marker(&self, subsystem: &str) -> PathBuf {
        self.options.dirty_dir().join(format!("{subsystem}.dirty"))
    }

    pub fn mark_dirty(&self, subsystem: &str) -> Result<()> {
        let marker = self.dirty_marker(subsystem);
        if let Some(dir) = marker.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&marker, b"")?;
        debug!(subsystem, "subsystem marked dirty");
        Ok(())
    }

    pub fn is_dirty(&self, subsystem: &str) -> bool {
        self.dirty_marker(subsystem).exists()
    }

    /// Called by whatever reconciles the subsystem once it has caught up.
    pub fn clear_dirty(&self, subsystem: &str) -> Result<()> {
        match fs::remove_file(self.dirty_marker(subsystem)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Io(err)),
        }
    }
}

fn stamp_revision(tree: &mut Value, entry: &AuditEntry) -> Result<()> {
    let revision = Value::Map(
        [
            (tree::key("time"), Value::I64(entry.time)),
            (tree::key("description"), tree::key(&entry.note)),
            (tree::key("username"), tree::key(&entry.username)),
        ]
        .into_iter()
        .collect(),
    );
    tree::set(tree, "revision", revision)
}
