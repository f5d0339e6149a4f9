//! # asset-vfs - Virtual Asset Overlay with Live Sync
//!
//! Presents one virtual asset namespace built by overlaying a project's asset
//! folders on top of its libraries, keeps it in sync with external edits and
//! mediates editor-driven save / delete / copy operations.
//!
//! ## Features
//!
//! - **Override precedence**: project beats libraries, earlier libraries beat later ones
//! - **Collision reports**: shadowed files with different content are reported, identical
//!   ones vanish
//! - **Live sync**: debounced OS watches, self-write suppression and batched change notifications
//! - **Safe mutations**: bounded retries for locked files and timestamped delete backups
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use asset_vfs::{BroadcastPort, Notification, SyncConfig, SyncSession};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let port = Arc::new(BroadcastPort::new());
//!     let mut notifications = port.subscribe();
//!     let session = SyncSession::open(".", "demo", SyncConfig::default(), port).await?;
//!
//!     for (asset_type, assets) in session.enumerate().assets {
//!         println!("{}: {} assets", asset_type, assets.len());
//!     }
//!
//!     while let Ok(notification) = notifications.recv().await {
//!         if let Notification::FilesChanged { files } = notification {
//!             println!("{} files changed", files.len());
//!         }
//!     }
//!     session.close().await;
//!     Ok(())
//! }
//! ```

pub mod coalesce;
pub mod config;
pub mod error;
pub mod gateway;
pub mod hash;
pub mod index;
pub mod ledger;
pub mod mapper;
pub mod port;
pub mod project;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod watch;

// Re-export main types for library consumers
pub use coalesce::{ChangeCoalescer, ChangedFile};
pub use config::{BackupDedup, ShadowRule, SyncConfig, CONFIG_FILE_NAME};
pub use error::{FileOp, SyncError, SyncResult};
pub use index::{AssetEntry, Collision, Enumeration, VirtualNamespace};
pub use mapper::PathMapper;
pub use port::{BroadcastPort, Notification, NotificationPort};
pub use project::{list_projects, Project, ProjectDescriptor};
pub use resolver::{AssetType, DataFolder, LibraryRef};
pub use retry::RetryPolicy;
pub use session::{MutationOutcome, MutationRequest, SyncSession};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
