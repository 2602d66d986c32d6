//! Store abstraction for zion's on-disk state.
//!
//! All shared state lives in plain JSON documents under one state directory:
//! the canonical world document, the reputation ledger and the inbox queue.
//! Writers never edit a document in place. They serialize to a hidden temp
//! sibling and rename it over the target, so a reader sees either the previous
//! committed document or the new one. Concurrent writers coordinate through a
//! [`StoreLease`] lock file next to the guarded document.

use crate::core::config::PathsConfig;
use crate::core::error::ZionError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use ulid::Ulid;

/// Store handle: resolved locations of every document the core touches.
#[derive(Debug, Clone)]
pub struct Store {
    /// State directory root
    pub root: PathBuf,
    /// Inbox queue directory
    pub inbox: PathBuf,
    /// Canonical world document
    pub world: PathBuf,
    /// Reputation ledger document
    pub reputation: PathBuf,
}

impl Store {
    /// Store rooted at `root` with the conventional layout.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Store {
            inbox: root.join("inbox"),
            world: root.join("world.json"),
            reputation: root.join("reputation.json"),
            root,
        }
    }

    pub fn from_paths(paths: &PathsConfig) -> Self {
        let mut store = Store::at(&paths.state_dir);
        if let Some(inbox) = &paths.inbox {
            store.inbox = inbox.clone();
        }
        if let Some(world) = &paths.world {
            store.world = world.clone();
        }
        if let Some(reputation) = &paths.reputation {
            store.reputation = reputation.clone();
        }
        store
    }

    pub fn ensure_layout(&self) -> Result<(), ZionError> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(&self.inbox)?;
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, Ulid::new()))
}

/// Pretty-print `value` and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ZionError> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_bytes_atomic(path, &bytes)
}

pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), ZionError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = temp_sibling(path);
    let written = (|| -> Result<(), ZionError> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}

/// Read a document, distinguishing "absent" (`Ok(None)`) from I/O failure.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, ZionError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ZionError::IoError(err)),
    }
}

/// SHA-256 hex digest of a document's bytes.
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Lease timing knobs for [`StoreLease::acquire`].
#[derive(Debug, Clone, Copy)]
pub struct LeasePolicy {
    pub wait: Duration,
    pub stale_after: Duration,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        LeasePolicy {
            wait: Duration::from_millis(2000),
            stale_after: Duration::from_secs(300),
        }
    }
}

/// Exclusive writer lease on a document, held as `<document>.lock`.
///
/// The lock file carries a per-acquisition ULID token. A holder only ever
/// removes a lock file that still carries its own token, and long passes
/// call [`StoreLease::refresh`] so they are not mistaken for stale.
#[derive(Debug)]
pub struct StoreLease {
    path: PathBuf,
    token: String,
    file: File,
}

impl StoreLease {
    pub fn lock_path(document: &Path) -> PathBuf {
        let name = document
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());
        document.with_file_name(format!("{}.lock", name))
    }

    /// Acquire the lease, retrying until `policy.wait` elapses.
    pub fn acquire(document: &Path, policy: LeasePolicy) -> Result<StoreLease, ZionError> {
        let lock_path = Self::lock_path(document);
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let started = Instant::now();
        loop {
            if let Some(lease) = Self::try_acquire(&lock_path)? {
                return Ok(lease);
            }
            if Self::take_over_stale(&lock_path, policy.stale_after)? {
                continue;
            }
            if started.elapsed() >= policy.wait {
                return Err(ZionError::LockContention(format!(
                    "{} is held by another writer",
                    lock_path.display()
                )));
            }
            thread::sleep(Duration::from_millis(25));
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Bump the lock's mtime so a long-running holder stays live.
    pub fn refresh(&self) -> Result<(), ZionError> {
        self.file.set_modified(SystemTime::now())?;
        Ok(())
    }

    fn try_acquire(lock_path: &Path) -> Result<Option<StoreLease>, ZionError> {
        // create_new gives single-winner semantics per path.
        let mut file = match OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(lock_path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(err) => return Err(ZionError::IoError(err)),
        };
        let token = Ulid::new().to_string();
        writeln!(file, "{} {}", token, std::process::id())?;
        file.sync_all()?;
        Ok(Some(StoreLease {
            path: lock_path.to_path_buf(),
            token,
            file,
        }))
    }

    /// Move a stale lock aside. Returns whether the path was freed.
    ///
    /// The lock is renamed to a unique name rather than deleted, then its
    /// token is compared with the one judged stale. If a fresh lock was
    /// moved instead, it is linked back into place.
    fn take_over_stale(lock_path: &Path, stale_after: Duration) -> Result<bool, ZionError> {
        let Some(observed) = read_lock_token(lock_path) else {
            return Ok(false);
        };
        if !is_stale(lock_path, stale_after) {
            return Ok(false);
        }
        let name = lock_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document.lock".to_string());
        let aside = lock_path.with_file_name(format!(".{}.stale-{}", name, Ulid::new()));
        match fs::rename(lock_path, &aside) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(ZionError::IoError(err)),
        }
        let moved = read_lock_token(&aside);
        if moved.as_deref() != Some(observed.as_str()) {
            // hard_link never replaces an existing path.
            let _ = fs::hard_link(&aside, lock_path);
            let _ = fs::remove_file(&aside);
            return Ok(false);
        }
        tracing::warn!(lock = %lock_path.display(), stale_token = %observed, "took over stale lock");
        let _ = fs::remove_file(&aside);
        Ok(true)
    }
}

fn read_lock_token(lock_path: &Path) -> Option<String> {
    let content = fs::read_to_string(lock_path).ok()?;
    Some(content.split_whitespace().next().unwrap_or("").to_string())
}

fn is_stale(lock_path: &Path, stale_after: Duration) -> bool {
    fs::metadata(lock_path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > stale_after)
}

impl Drop for StoreLease {
    fn drop(&mut self) {
        if read_lock_token(&self.path).as_deref() == Some(self.token.as_str()) {
            let _ = fs::remove_file(&self.path);
        } else {
            tracing::warn!(lock = %self.path.display(), "lease lost before release; lock left in place");
        }
    }
}
