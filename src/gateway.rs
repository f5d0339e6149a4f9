//! Retrying, backup-aware file mutations.
//!
//! This is the only place that writes to asset folders on behalf of the
//! editor. Every attempt registers its target with the [`IgnoreLedger`]
//! before touching the disk, so the watcher does not report the editor's own
//! writes back to it.

use chrono::{DateTime, NaiveDateTime, Utc};
use dashmap::DashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackupDedup, SyncConfig};
use crate::error::{FileOp, SyncError, SyncResult};
use crate::hash::HashStore;
use crate::ledger::IgnoreLedger;
use crate::retry::{with_retry, RetryPolicy};

const BACKUP_TAG: &str = "deleted";
const BACKUP_EXTENSION: &str = ".log";
const BACKUP_TIME_FORMAT: &str = "%Y%m%dT%H%M%S";

/// What a delete actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The file was unlinked without a new backup.
    Removed,
    /// The file was renamed into this backup artifact.
    BackedUp(PathBuf),
}

#[derive(Debug, Clone)]
struct BackedUp {
    size: u64,
    hash: Option<String>,
}

pub struct MutationGateway {
    ledger: IgnoreLedger,
    hashes: Arc<HashStore>,
    policy: RetryPolicy,
    retention: Duration,
    dedup: BackupDedup,
    backup_prefix: String,
    backups: DashMap<PathBuf, BackedUp>,
}

impl MutationGateway {
    pub fn new(ledger: IgnoreLedger, hashes: Arc<HashStore>, config: &SyncConfig) -> Self {
        Self {
            ledger,
            hashes,
            policy: config.retry.clone(),
            retention: config.backup_retention(),
            dedup: config.backup_dedup,
            backup_prefix: format!("{}{}", config.reserved_prefix, BACKUP_TAG),
            backups: DashMap::new(),
        }
    }

    pub fn ledger(&self) -> &IgnoreLedger {
        &self.ledger
    }

    /// Write `bytes` to `path`, creating missing parent directories.
    pub async fn save(&self, path: &Path, bytes: &[u8]) -> SyncResult<()> {
        self.attempt(FileOp::Save, path, || {
            ensure_parent(path)?;
            self.ledger.register(path);
            std::fs::write(path, bytes)
        })
        .await
    }

    /// Copy `from` to `to`, creating missing parent directories of `to`.
    ///
    /// Copying a file onto itself is a no-op; `std::fs::copy` would
    /// truncate it.
    pub async fn copy(&self, from: &Path, to: &Path) -> SyncResult<()> {
        if !from.is_file() {
            return Err(SyncError::NotFound(from.to_path_buf()));
        }
        if same_file(from, to) {
            tracing::debug!("{} is already in place", to.display());
            return Ok(());
        }
        self.attempt(FileOp::Copy, to, || {
            ensure_parent(to)?;
            self.ledger.register(to);
            std::fs::copy(from, to).map(|_| ())
        })
        .await
    }

    /// Delete `path`, optionally keeping a timestamped backup next to it.
    ///
    /// A backup is skipped when this path was already backed up at its
    /// current size (and hash, with [`BackupDedup::SizeAndHash`]); the file is
    /// then simply unlinked and the earlier artifact stays the recovery point.
    pub async fn delete(&self, path: &Path, with_backup: bool) -> SyncResult<DeleteOutcome> {
        if !path.exists() {
            return Err(SyncError::NotFound(path.to_path_buf()));
        }
        self.attempt(FileOp::Delete, path, || {
            self.ledger.register(path);
            if with_backup {
                if let Some(artifact) = self.backup(path)? {
                    return Ok(DeleteOutcome::BackedUp(artifact));
                }
            }
            std::fs::remove_file(path)?;
            Ok(DeleteOutcome::Removed)
        })
        .await
    }

    /// Read a file, tolerating transient locks like the mutations do.
    pub async fn read(&self, path: &Path) -> SyncResult<Vec<u8>> {
        if !path.is_file() {
            return Err(SyncError::NotFound(path.to_path_buf()));
        }
        self.attempt(FileOp::Read, path, || std::fs::read(path)).await
    }

    async fn attempt<T, F>(&self, op: FileOp, path: &Path, f: F) -> SyncResult<T>
    where
        F: FnMut() -> io::Result<T>,
    {
        with_retry(&self.policy, f).await.map_err(|exhausted| {
            tracing::warn!(
                "giving up on {} {} after {} attempts: {}",
                op,
                path.display(),
                exhausted.attempts,
                exhausted.last_error
            );
            SyncError::FileOperation {
                op,
                path: path.to_path_buf(),
                attempts: exhausted.attempts,
                message: exhausted.last_error.to_string(),
            }
        })
    }

    /// Rename `path` into a backup artifact, unless that would be redundant.
    fn backup(&self, path: &Path) -> io::Result<Option<PathBuf>> {
        let size = std::fs::metadata(path)?.len();
        let hash = match self.dedup {
            BackupDedup::Size => None,
            BackupDedup::SizeAndHash => Some(self.hashes.hash_file(path)?),
        };

        if let Some(previous) = self.backups.get(path) {
            if previous.size == size && previous.hash == hash {
                tracing::debug!("{} already backed up at {} bytes", path.display(), size);
                return Ok(None);
            }
        }

        let dir = path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.prune_backups(dir, Utc::now());

        let artifact = unique_backup_path(dir, &self.backup_prefix, &basename, Utc::now());
        std::fs::rename(path, &artifact)?;
        self.hashes.forget(path);
        self.backups.insert(path.to_path_buf(), BackedUp { size, hash });
        tracing::info!("backed up {} as {}", path.display(), artifact.display());
        Ok(Some(artifact))
    }

    /// Remove backup artifacts in `dir` older than the retention period.
    pub fn prune_backups(&self, dir: &Path, now: DateTime<Utc>) -> usize {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&self.backup_prefix) {
                continue;
            }
            let taken_at = backup_timestamp(&name).or_else(|| {
                entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .map(DateTime::<Utc>::from)
            });
            let Some(taken_at) = taken_at else { continue };
            let expired = (now - taken_at)
                .to_std()
                .map(|age| age > self.retention)
                .unwrap_or(false);
            if expired {
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(err) => tracing::warn!("can not prune {}: {}", entry.path().display(), err),
                }
            }
        }
        removed
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (dunce::canonicalize(a), dunce::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

/// `~deleted(<basename>)<UTC yyyymmddThhmmss>-<millis>.log`
pub fn backup_name(prefix: &str, basename: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}({}){}-{:03}{}",
        prefix,
        basename,
        at.format(BACKUP_TIME_FORMAT),
        at.timestamp_subsec_millis(),
        BACKUP_EXTENSION
    )
}

fn unique_backup_path(dir: &Path, prefix: &str, basename: &str, at: DateTime<Utc>) -> PathBuf {
    let base = backup_name(prefix, basename, at);
    let mut candidate = dir.join(&base);
    let mut n = 1;
    while candidate.exists() {
        let stem = base.trim_end_matches(BACKUP_EXTENSION);
        candidate = dir.join(format!("{stem}_{n}{BACKUP_EXTENSION}"));
        n += 1;
    }
    candidate
}

/// Timestamp embedded in a backup artifact name.
pub fn backup_timestamp(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.rsplit_once(')')?.1.strip_suffix(BACKUP_EXTENSION)?;
    let (date, rest) = stamp.split_once('-')?;
    let millis: i64 = rest.split('_').next()?.parse().ok()?;
    let naive = NaiveDateTime::parse_from_str(date, BACKUP_TIME_FORMAT).ok()?;
    Some(naive.and_utc() + chrono::Duration::milliseconds(millis))
}
