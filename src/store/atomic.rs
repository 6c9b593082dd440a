use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    thread,
    time::{Duration, SystemTime},
};

use fs2::FileExt;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Exclusive advisory lock on a sidecar file, released on drop.
pub(crate) struct FileLock {
    file: File,
}

impl FileLock {
    /// Polls for the lock up to `attempts` times, sleeping `interval`
    /// between tries.
    pub(crate) fn acquire(path: &Path, attempts: u32, interval: Duration) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let contended = fs2::lock_contended_error().raw_os_error();
        for attempt in 1..=attempts.max(1) {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(Self { file }),
                Err(err) if err.kind() == ErrorKind::WouldBlock || err.raw_os_error() == contended => {
                    debug!(path = %path.display(), attempt, "config lock busy");
                    if attempt < attempts {
                        thread::sleep(interval);
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(path = %path.display(), attempts, "giving up on config lock");
        Err(Error::LockExhausted {
            path: path.display().to_string(),
            attempts,
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(error = %err, "failed to release config lock");
        }
    }
}

/// Identity of the on-disk file at the time it was last read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

pub(crate) struct AtomicFile {
    path: PathBuf,
}

impl AtomicFile {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn fingerprint(&self) -> Option<Fingerprint> {
        let metadata = fs::metadata(&self.path).ok()?;
        Some(Fingerprint {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }

    /// Reads the whole file. A missing file reads as `None`.
    ///
    /// Readers never take the lock; writes land through a rename so a
    /// reader sees either the previous or the next complete file.
    pub(crate) fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) fn write(&self, contents: &str) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;

        tmp.write_all(contents.as_bytes())?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;

        tmp.persist(&self.path).map_err(|err| err.error)?;

        Ok(())
    }
}
