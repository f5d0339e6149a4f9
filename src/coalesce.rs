//! Trailing-edge batching of change notifications.
//!
//! Every accepted change restarts the settling window. Nothing is delivered
//! until the filesystem has been quiet for the whole window; then the pending
//! set goes out as one batch, one entry per virtual name, latest wins.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// One entry of a change batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    /// Virtual path of the changed asset.
    pub name: String,
    /// Modification time in milliseconds since the epoch; 0 when deleted.
    #[serde(rename = "mtime")]
    pub mtime_ms: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

impl ChangedFile {
    pub fn modified(name: impl Into<String>, mtime_ms: u64) -> Self {
        Self {
            name: name.into(),
            mtime_ms,
            deleted: false,
        }
    }

    pub fn deleted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mtime_ms: 0,
            deleted: true,
        }
    }
}

#[derive(Debug)]
pub struct ChangeCoalescer {
    window: Duration,
    pending: IndexMap<String, ChangedFile>,
    deadline: Option<Instant>,
}

impl ChangeCoalescer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: IndexMap::new(),
            deadline: None,
        }
    }

    /// Record a change and push the flush deadline out to `now + window`.
    pub fn push(&mut self, change: ChangedFile, now: Instant) {
        // Keep first-seen order while letting the newest state replace the old.
        self.pending.insert(change.name.clone(), change);
        self.deadline = Some(now + self.window);
    }

    /// When the pending batch becomes due, if there is one.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drain the batch if the settling window has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Option<Vec<ChangedFile>> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                let batch: Vec<ChangedFile> = self.pending.drain(..).map(|(_, c)| c).collect();
                (!batch.is_empty()).then_some(batch)
            }
            _ => None,
        }
    }

    /// Discard anything pending, e.g. when the session closes.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.deadline = None;
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
