//! Error types for the overlay and live-sync engine.
//!
//! Resolver-level failures abort opening a project, mutation failures are
//! returned per call, and watcher failures are logged and never propagated
//! into the sync loop.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the library.
pub type SyncResult<T> = Result<T, SyncError>;

/// Which mutation exhausted its retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Save,
    Delete,
    Copy,
    Read,
}

impl std::fmt::Display for FileOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let verb = match self {
            FileOp::Save => "save",
            FileOp::Delete => "delete",
            FileOp::Copy => "copy",
            FileOp::Read => "read",
        };
        f.write_str(verb)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// A declared library root does not exist. Fatal to opening the project.
    #[error("library folder '{library}' not found (expected at {})", root.display())]
    MissingLibrary { library: String, root: PathBuf },

    /// No descriptor file at the expected location.
    #[error("project '{project}' not found: no descriptor at {}", descriptor.display())]
    ProjectNotFound { project: String, descriptor: PathBuf },

    /// A save/delete/copy/read kept failing until the retry budget ran out.
    #[error("can not {op} file {}: {message} (after {attempts} attempts)", path.display())]
    FileOperation {
        op: FileOp,
        path: PathBuf,
        attempts: u32,
        message: String,
    },

    /// A folder could not be placed under OS observation.
    #[error("can not watch {}: {message}", path.display())]
    WatchSetup { path: PathBuf, message: String },

    /// The target of an operation does not exist.
    #[error("file does not exist: {}", .0.display())]
    NotFound(PathBuf),

    /// The project descriptor is not valid JSON.
    #[error("invalid project descriptor {}: {source}", path.display())]
    Descriptor {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The configuration file is not valid TOML.
    #[error("invalid configuration {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The session loop has already shut down.
    #[error("sync session is closed")]
    SessionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SyncError {
    pub(crate) fn watch_setup(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::WatchSetup {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// True for errors that end the attempt to open a project.
    pub fn is_fatal_to_open(&self) -> bool {
        matches!(
            self,
            SyncError::MissingLibrary { .. }
                | SyncError::ProjectNotFound { .. }
                | SyncError::Descriptor { .. }
        )
    }
}
