//! Suppression of watcher events caused by our own writes.
//!
//! Before the gateway touches a file it registers the path here; for the
//! next quiescence window any watcher event for that path is attributed to
//! the editor itself and dropped. Registrations expire by deadline, so no
//! timers are involved: stale entries are purged whenever the ledger is
//! touched.

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct IgnoreLedger {
    entries: Arc<DashMap<PathBuf, Instant>>,
    window: Duration,
}

impl IgnoreLedger {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            window,
        }
    }

    /// Suppress events for `path` until the window elapses. Registering an
    /// already-suppressed path restarts its window.
    pub fn register(&self, path: &Path) {
        self.register_at(path, Instant::now());
    }

    pub fn register_at(&self, path: &Path, now: Instant) {
        self.purge(now);
        self.entries.insert(resolve(path), now + self.window);
    }

    pub fn is_suppressed(&self, path: &Path) -> bool {
        self.is_suppressed_at(path, Instant::now())
    }

    pub fn is_suppressed_at(&self, path: &Path, now: Instant) -> bool {
        self.purge(now);
        self.entries
            .get(&resolve(path))
            .map(|deadline| *deadline > now)
            .unwrap_or(false)
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge(&self, now: Instant) {
        self.entries.retain(|_, deadline| *deadline > now);
    }
}

/// Absolute, lexically normalized form of `path`.
fn resolve(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    crate::resolver::normalize(&absolute)
}
