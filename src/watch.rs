//! OS watches over the resolved asset folders.
//!
//! Each distinct folder gets its own debounced recursive watch. Raw events
//! are filtered in the debouncer callback and forwarded to the session loop
//! over an unbounded channel; deciding whether a surviving event is a real
//! external change happens there, not here.

use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::resolver::{normalize, DataFolder};

/// A path that should be under observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub path: PathBuf,
    /// Events under this target are reported as the canonical translation file.
    pub external_translation: bool,
}

/// A filtered filesystem event, not yet checked against the ledger or index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Watched folder the event came from.
    pub root: PathBuf,
    pub path: PathBuf,
    pub external_translation: bool,
}

/// Compute the deduplicated watch set for a folder list.
///
/// Both source folder types live under a shared `src` directory, which is
/// watched once instead of per type. External translation paths are
/// workspace-relative and get targets of their own.
pub fn watch_targets(
    folders: &[DataFolder],
    workspace: &Path,
    external_translations: &[String],
) -> Vec<WatchTarget> {
    let mut targets: Vec<WatchTarget> = Vec::new();
    let mut push = |path: PathBuf, external_translation: bool| {
        if !targets.iter().any(|t| t.path == path) {
            targets.push(WatchTarget {
                path,
                external_translation,
            });
        }
    };

    for folder in folders {
        let path = if folder.asset_type.is_source() {
            folder
                .path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| folder.path.clone())
        } else {
            folder.path.clone()
        };
        push(path, false);
    }
    for entry in external_translations {
        push(normalize(&workspace.join(entry.trim_start_matches('/'))), true);
    }
    targets
}

/// Drops events nobody should hear about.
#[derive(Debug, Clone)]
pub struct EventFilter {
    reserved_prefix: String,
    extensions: Vec<String>,
}

impl EventFilter {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            reserved_prefix: config.reserved_prefix.clone(),
            extensions: config.watch_extensions.clone(),
        }
    }

    /// True when an event for `path` under `root` should be forwarded.
    pub fn accepts(&self, root: &Path, path: &Path) -> bool {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let reserved = !self.reserved_prefix.is_empty()
            && relative.components().any(|c| match c {
                Component::Normal(seg) => seg.to_string_lossy().starts_with(&self.reserved_prefix),
                _ => false,
            });
        if reserved {
            return false;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|a| a.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

struct ActiveWatch {
    external_translation: bool,
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

/// What a [`WatchManager::reconcile`] call changed.
#[derive(Debug, Default)]
pub struct Reconciled {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub errors: Vec<SyncError>,
}

pub struct WatchManager {
    active: HashMap<PathBuf, ActiveWatch>,
    events: mpsc::UnboundedSender<WatchEvent>,
    filter: Arc<EventFilter>,
    debounce: Duration,
}

impl WatchManager {
    /// Create a manager with no watches. Events from every watch installed
    /// later arrive on the returned receiver.
    pub fn new(config: &SyncConfig) -> (Self, mpsc::UnboundedReceiver<WatchEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                active: HashMap::new(),
                events,
                filter: Arc::new(EventFilter::from_config(config)),
                debounce: config.recheck_delay(),
            },
            rx,
        )
    }

    /// Bring the active watch set in line with `targets`.
    ///
    /// Folders that are no longer wanted are unwatched, new ones are added
    /// and unchanged ones keep their existing watch. A folder that can not be
    /// watched is reported in [`Reconciled::errors`] and left out.
    pub fn reconcile(&mut self, targets: &[WatchTarget]) -> Reconciled {
        let mut result = Reconciled::default();

        let stale: Vec<PathBuf> = self
            .active
            .iter()
            .filter(|(path, active)| {
                !targets.iter().any(|t| {
                    &t.path == *path && t.external_translation == active.external_translation
                })
            })
            .map(|(path, _)| path.clone())
            .collect();
        for path in stale {
            self.active.remove(&path);
            tracing::debug!("stopped watching {}", path.display());
            result.removed.push(path);
        }

        for target in targets {
            if self.active.contains_key(&target.path) {
                continue;
            }
            match self.install(target) {
                Ok(debouncer) => {
                    tracing::debug!("watching {}", target.path.display());
                    self.active.insert(
                        target.path.clone(),
                        ActiveWatch {
                            external_translation: target.external_translation,
                            _debouncer: debouncer,
                        },
                    );
                    result.added.push(target.path.clone());
                }
                Err(err) => {
                    tracing::warn!("{}", err);
                    result.errors.push(err);
                }
            }
        }
        result
    }

    fn install(
        &self,
        target: &WatchTarget,
    ) -> Result<Debouncer<RecommendedWatcher, RecommendedCache>, SyncError> {
        if !target.path.exists() {
            return Err(SyncError::watch_setup(&target.path, "path does not exist"));
        }

        let root = target.path.clone();
        let external_translation = target.external_translation;
        let filter = Arc::clone(&self.filter);
        let tx = self.events.clone();

        let mut debouncer = new_debouncer(self.debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        if !matches!(
                            event.event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                        ) {
                            continue;
                        }
                        for path in &event.event.paths {
                            if !filter.accepts(&root, path) {
                                continue;
                            }
                            let _ = tx.send(WatchEvent {
                                root: root.clone(),
                                path: path.clone(),
                                external_translation,
                            });
                        }
                    }
                }
                Err(errors) => {
                    for err in errors {
                        tracing::warn!("watch error under {}: {}", root.display(), err);
                    }
                }
            }
        })
        .map_err(|err| SyncError::watch_setup(&target.path, err))?;

        let mode = if target.path.is_dir() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        debouncer
            .watch(&target.path, mode)
            .map_err(|err| SyncError::watch_setup(&target.path, err))?;
        Ok(debouncer)
    }

    /// Currently watched paths, sorted.
    pub fn watched(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.active.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.active.contains_key(path)
    }

    /// Drop every watch.
    pub fn clear(&mut self) {
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::AssetType;
    use std::fs;
    use tempfile::TempDir;

    fn folder(asset_type: AssetType, path: PathBuf, library: Option<&str>) -> DataFolder {
        DataFolder {
            asset_type,
            path,
            library: library.map(str::to_string),
        }
    }

    #[test]
    fn source_folders_collapse_to_src() {
        let root = PathBuf::from("/ws/games/demo");
        let folders = vec![
            folder(AssetType::Image, root.join("img"), None),
            folder(AssetType::SourceScenes, root.join("src/scenes"), None),
            folder(AssetType::SourceGameObjects, root.join("src/game-objects"), None),
        ];
        let targets = watch_targets(&folders, Path::new("/ws"), &["i18n-shared/en".into()]);
        let paths: Vec<&Path> = targets.iter().map(|t| t.path.as_path()).collect();
        assert_eq!(
            paths,
            vec![
                Path::new("/ws/games/demo/img"),
                Path::new("/ws/games/demo/src"),
                Path::new("/ws/i18n-shared/en"),
            ]
        );
        assert!(targets[2].external_translation);
        assert!(!targets[0].external_translation);
    }

    #[test]
    fn filter_rejects_reserved_and_foreign_files() {
        let filter = EventFilter::from_config(&SyncConfig::default());
        let root = Path::new("/ws/games/demo/img");
        assert!(filter.accepts(root, &root.join("hero.png")));
        assert!(filter.accepts(root, &root.join("ui/HUD.PNG")));
        assert!(!filter.accepts(root, &root.join("~deleted(hero.png)20261018T093005-042.log")));
        assert!(!filter.accepts(root, &root.join("~tmp/hero.png")));
        assert!(!filter.accepts(root, &root.join("~hero.png")));
        assert!(!filter.accepts(root, &root.join("hero.psd")));
        assert!(!filter.accepts(root, &root.join("atlas.webp")));
    }

    fn target(path: PathBuf) -> WatchTarget {
        WatchTarget {
            path,
            external_translation: false,
        }
    }

    #[tokio::test]
    async fn reconcile_keeps_unchanged_and_drops_stale() {
        let temp = TempDir::new().unwrap();
        let img = temp.path().join("img");
        let snd = temp.path().join("snd");
        fs::create_dir_all(&img).unwrap();
        fs::create_dir_all(&snd).unwrap();

        let (mut manager, _rx) = WatchManager::new(&SyncConfig::default());
        let both = vec![target(img.clone()), target(snd.clone())];
        let first = manager.reconcile(&both);
        assert_eq!(first.added.len(), 2);
        assert!(first.errors.is_empty());

        let again = manager.reconcile(&both);
        assert!(again.added.is_empty());
        assert!(again.removed.is_empty());

        let shrunk = manager.reconcile(&both[..1]);
        assert_eq!(shrunk.removed, vec![snd.clone()]);
        assert!(shrunk.added.is_empty());
        assert_eq!(manager.watched(), vec![img]);
    }

    #[tokio::test]
    async fn missing_folder_is_reported_not_fatal() {
        let temp = TempDir::new().unwrap();
        let img = temp.path().join("img");
        fs::create_dir_all(&img).unwrap();
        let (mut manager, _rx) = WatchManager::new(&SyncConfig::default());

        let result = manager.reconcile(&[
            target(temp.path().join("gone")),
            target(img.clone()),
        ]);
        assert_eq!(result.errors.len(), 1);
        assert!(matches!(result.errors[0], SyncError::WatchSetup { .. }));
        assert!(manager.is_watching(&img));
    }

    #[tokio::test]
    async fn forwards_filtered_events() {
        let temp = TempDir::new().unwrap();
        let img = dunce::canonicalize(temp.path()).unwrap().join("img");
        fs::create_dir_all(&img).unwrap();
        let (mut manager, mut rx) = WatchManager::new(&SyncConfig::default());
        manager.reconcile(&[target(img.clone())]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(img.join("notes.txt"), b"ignored").unwrap();
        fs::write(img.join("hero.png"), b"pixels").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no watch event")
            .unwrap();
        assert_eq!(event.root, img);
        assert_eq!(event.path.file_name().unwrap(), "hero.png");
        assert!(!event.external_translation);
    }
}
