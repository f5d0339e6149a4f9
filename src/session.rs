//! One opened project: namespace, mutations and live sync.
//!
//! [`SyncSession::open`] loads the descriptor, builds the initial namespace,
//! installs watches and spawns the sync loop. The loop task is the only owner
//! of the [`WatchManager`] and the [`ChangeCoalescer`]; rebuild and reload
//! requests reach it as commands, so a rebuild never interleaves with event
//! evaluation. Readers go through the shared [`NamespaceHandle`] and always
//! see a complete snapshot.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::coalesce::{ChangeCoalescer, ChangedFile};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::gateway::MutationGateway;
use crate::hash::HashStore;
use crate::index::{self, system_time_ms, Collision, Enumeration, VirtualNamespace};
use crate::ledger::IgnoreLedger;
use crate::mapper::{NamespaceHandle, PathMapper};
use crate::port::NotificationPort;
use crate::project::{Project, ProjectDescriptor};
use crate::resolver::{resolve_data_folders, resolve_libraries};
use crate::watch::{watch_targets, WatchEvent, WatchManager, WatchTarget};

/// A file operation requested by the editor, addressed by virtual path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MutationRequest {
    Save {
        path: String,
        bytes: Vec<u8>,
    },
    Delete {
        path: String,
        #[serde(default = "default_backup")]
        backup: bool,
    },
    Copy {
        from: String,
        to: String,
    },
}

fn default_backup() -> bool {
    true
}

/// Result of a mutation as returned to the editor: `{}` or `{"error": ...}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MutationOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<SyncResult<()>> for MutationOutcome {
    fn from(result: SyncResult<()>) -> Self {
        Self {
            error: result.err().map(|err| err.to_string()),
        }
    }
}

enum Command {
    Rebuild {
        reply: oneshot::Sender<SyncResult<()>>,
    },
    Reload {
        reply: oneshot::Sender<SyncResult<ProjectDescriptor>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// State shared between the public handle and the sync loop.
struct Shared {
    workspace: PathBuf,
    config: Arc<SyncConfig>,
    project: RwLock<Project>,
    mapper: PathMapper,
    hashes: Arc<HashStore>,
    gateway: MutationGateway,
    port: Arc<dyn NotificationPort>,
}

impl Shared {
    fn watch_targets(&self, ns: &VirtualNamespace) -> Vec<WatchTarget> {
        let project = self.project.read();
        watch_targets(
            ns.folders(),
            &self.workspace,
            &project.descriptor.external_translations,
        )
    }

    /// Re-stat indexed files so the snapshot carries their current
    /// modification time and size.
    fn refresh_entries(&self, physicals: &[PathBuf]) {
        let stats: Vec<(&PathBuf, SystemTime, u64)> = physicals
            .iter()
            .filter_map(|path| {
                let meta = std::fs::metadata(path).ok()?;
                Some((path, meta.modified().ok()?, meta.len()))
            })
            .collect();
        if stats.is_empty() {
            return;
        }
        self.mapper.namespace().update(|ns| {
            for (path, modified, size) in stats {
                ns.refresh_entry(path, modified, size);
            }
        });
    }

    fn report_collisions(&self, collisions: &[Collision]) {
        if !collisions.is_empty() {
            tracing::warn!("{} duplicate assets with differing content", collisions.len());
            self.port.duplicate_assets_detected(collisions);
        }
    }
}

pub struct SyncSession {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncSession {
    /// Open `project_id` inside `workspace` and start live sync.
    ///
    /// Fails with [`SyncError::ProjectNotFound`] when the descriptor is
    /// missing and [`SyncError::MissingLibrary`] when a declared library root
    /// does not exist. Folders that can not be watched are logged and skipped.
    pub async fn open(
        workspace: impl AsRef<Path>,
        project_id: &str,
        config: SyncConfig,
        port: Arc<dyn NotificationPort>,
    ) -> SyncResult<Self> {
        let workspace = dunce::canonicalize(workspace.as_ref())?;
        let config = Arc::new(config);
        let project = Project::load(&workspace, project_id, &config)?;
        let hashes = Arc::new(HashStore::new());

        let ns = build_namespace(
            workspace.clone(),
            project.clone(),
            Arc::clone(&hashes),
            Arc::clone(&config),
        )
        .await?;
        let collisions = ns.collisions().to_vec();
        tracing::info!(
            "opened project {} with {} assets from {} folders",
            project.id,
            ns.len(),
            ns.folders().len()
        );

        let mapper = PathMapper::new(
            &workspace,
            &project.id,
            &project.root,
            NamespaceHandle::new(ns),
        );
        let gateway = MutationGateway::new(
            IgnoreLedger::new(config.ignore_window()),
            Arc::clone(&hashes),
            &config,
        );
        let shared = Arc::new(Shared {
            workspace,
            config: Arc::clone(&config),
            project: RwLock::new(project),
            mapper,
            hashes,
            gateway,
            port,
        });
        shared.report_collisions(&collisions);

        let (mut watches, events) = WatchManager::new(&config);
        let targets = shared.watch_targets(&shared.mapper.namespace().load());
        let installed = watches.reconcile(&targets);
        tracing::debug!(
            "watching {} folders ({} failed)",
            installed.added.len(),
            installed.errors.len()
        );

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let sync_loop = SyncLoop {
            shared: Arc::clone(&shared),
            watches,
            coalescer: ChangeCoalescer::new(config.settling_window()),
            events,
            commands,
        };
        let task = tokio::spawn(sync_loop.run());

        Ok(Self {
            shared,
            commands: commands_tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn workspace(&self) -> &Path {
        &self.shared.workspace
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    pub fn project_id(&self) -> String {
        self.shared.project.read().id.clone()
    }

    /// The descriptor as last loaded.
    pub fn descriptor(&self) -> ProjectDescriptor {
        self.shared.project.read().descriptor.clone()
    }

    /// Current namespace snapshot.
    pub fn namespace(&self) -> Arc<VirtualNamespace> {
        self.shared.mapper.namespace().load()
    }

    /// Assets grouped by type plus merged library settings. Collisions are
    /// not included; they go out through the notification port.
    pub fn enumerate(&self) -> Enumeration {
        self.namespace().enumerate()
    }

    pub fn collisions(&self) -> Vec<Collision> {
        self.namespace().collisions().to_vec()
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.shared.mapper
    }

    pub fn resolve_physical(&self, virtual_path: &str) -> PathBuf {
        self.shared.mapper.to_physical(virtual_path)
    }

    pub fn resolve_virtual(&self, physical: &Path) -> String {
        self.shared.mapper.to_virtual(physical)
    }

    /// Apply a mutation and report the outcome in wire form.
    pub async fn mutate(&self, request: MutationRequest) -> MutationOutcome {
        let result = self.apply(request).await;
        if let Err(err) = &result {
            tracing::warn!("mutation failed: {}", err);
        }
        result.into()
    }

    /// Apply a mutation, keeping the typed error.
    ///
    /// Mutations that add or remove an indexed file trigger a rebuild before
    /// returning, so a following [`enumerate`](Self::enumerate) sees them.
    /// Writes to already indexed files refresh their entry in place.
    ///
    /// A copy always lands at the path the project owns under `to`, even
    /// when a library currently serves that virtual path.
    pub async fn apply(&self, request: MutationRequest) -> SyncResult<()> {
        let ns = self.namespace();
        let (target, structural) = match &request {
            MutationRequest::Save { path, bytes } => {
                let physical = self.resolve_physical(path);
                self.shared.gateway.save(&physical, bytes).await?;
                let structural = ns.entry_for_physical(&physical).is_none();
                (physical, structural)
            }
            MutationRequest::Delete { path, backup } => {
                let physical = self.resolve_physical(path);
                self.shared.gateway.delete(&physical, *backup).await?;
                let structural = ns.entry_for_physical(&physical).is_some();
                (physical, structural)
            }
            MutationRequest::Copy { from, to } => {
                let from = self.resolve_physical(from);
                let to = self.shared.mapper.to_owned_physical(to);
                self.shared.gateway.copy(&from, &to).await?;
                let structural = ns.entry_for_physical(&to).is_none();
                (to, structural)
            }
        };
        if structural {
            if let Err(err) = self.rebuild().await {
                tracing::warn!("rebuild after mutation failed: {}", err);
            }
        } else {
            self.shared.refresh_entries(&[target]);
        }
        Ok(())
    }

    /// Read the bytes served under `virtual_path`.
    pub async fn read(&self, virtual_path: &str) -> SyncResult<Vec<u8>> {
        let physical = self.resolve_physical(virtual_path);
        self.shared.gateway.read(&physical).await
    }

    /// Re-resolve folders, rebuild the namespace and reconcile watches.
    pub async fn rebuild(&self) -> SyncResult<()> {
        self.request(|reply| Command::Rebuild { reply }).await?
    }

    /// Re-read the descriptor from disk and rebuild. On failure the previous
    /// descriptor and namespace stay in effect.
    pub async fn reload_project(&self) -> SyncResult<ProjectDescriptor> {
        self.request(|reply| Command::Reload { reply }).await?
    }

    /// Stop the sync loop and drop every watch. Pending, not yet flushed
    /// changes are discarded. Closing twice is harmless.
    pub async fn close(&self) {
        let _ = self.request(|reply| Command::Close { reply }).await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> SyncResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| SyncError::SessionClosed)?;
        rx.await.map_err(|_| SyncError::SessionClosed)
    }
}

struct SyncLoop {
    shared: Arc<Shared>,
    watches: WatchManager,
    coalescer: ChangeCoalescer,
    events: mpsc::UnboundedReceiver<WatchEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl SyncLoop {
    async fn run(mut self) {
        loop {
            let deadline = self.coalescer.deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Rebuild { reply }) => {
                        let result = self.rebuild_index().await;
                        if result.is_ok() {
                            self.shared.port.index_rebuilt();
                        }
                        let _ = reply.send(result);
                    }
                    Some(Command::Reload { reply }) => {
                        let result = self.reload().await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Close { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(event) = self.events.recv() => self.on_event(event),
                _ = sleep_until(deadline) => self.flush().await,
            }
        }
    }

    fn on_event(&mut self, event: WatchEvent) {
        let ns = self.shared.mapper.namespace().load();
        let ledger = self.shared.gateway.ledger();
        if let Some(change) = evaluate(&event, &ns, ledger, &self.shared.config) {
            tracing::debug!("queued change {:?}", change);
            self.coalescer.push(change, Instant::now());
        }
    }

    async fn flush(&mut self) {
        let Some(batch) = self.coalescer.take_due(Instant::now()) else {
            return;
        };
        let ns = self.shared.mapper.namespace().load();
        let translations = translation_name(ns.project_id(), &self.shared.config);
        let structural = batch
            .iter()
            .any(|c| c.deleted || (c.name != translations && !ns.contains(&c.name)));

        let mut rebuilt = false;
        if structural {
            match self.rebuild_index().await {
                Ok(()) => rebuilt = true,
                Err(err) => tracing::warn!("rebuild after external change failed: {}", err),
            }
        }

        let batch = if rebuilt {
            revealed(batch, &self.shared.mapper.namespace().load())
        } else {
            let changed: Vec<PathBuf> = batch
                .iter()
                .filter(|c| !c.deleted)
                .filter_map(|c| ns.get(&c.name).map(|entry| entry.physical.clone()))
                .collect();
            self.shared.refresh_entries(&changed);
            batch
        };

        tracing::info!("{} files changed", batch.len());
        self.shared.port.files_changed(&batch);
        if rebuilt {
            self.shared.port.index_rebuilt();
        }
    }

    async fn rebuild_index(&mut self) -> SyncResult<()> {
        let project = self.shared.project.read().clone();
        let ns = build_namespace(
            self.shared.workspace.clone(),
            project,
            Arc::clone(&self.shared.hashes),
            Arc::clone(&self.shared.config),
        )
        .await?;
        let collisions = ns.collisions().to_vec();
        let targets = self.shared.watch_targets(&ns);
        let size = ns.len();

        self.shared.mapper.namespace().store(ns);
        let reconciled = self.watches.reconcile(&targets);
        tracing::info!(
            "rebuilt namespace: {} assets, +{} -{} watches",
            size,
            reconciled.added.len(),
            reconciled.removed.len()
        );
        self.shared.report_collisions(&collisions);
        Ok(())
    }

    async fn reload(&mut self) -> SyncResult<ProjectDescriptor> {
        let current = self.shared.project.read().clone();
        let fresh = current.reload(&self.shared.config)?;
        let descriptor = fresh.descriptor.clone();
        *self.shared.project.write() = fresh;

        if let Err(err) = self.rebuild_index().await {
            *self.shared.project.write() = current;
            return Err(err);
        }
        self.shared.port.index_rebuilt();
        Ok(descriptor)
    }

    fn shutdown(&mut self) {
        if !self.coalescer.is_empty() {
            tracing::debug!("discarding {} pending changes", self.coalescer.len());
        }
        self.coalescer.clear();
        self.watches.clear();
        tracing::info!("sync session closed");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

async fn build_namespace(
    workspace: PathBuf,
    project: Project,
    hashes: Arc<HashStore>,
    config: Arc<SyncConfig>,
) -> SyncResult<VirtualNamespace> {
    tokio::task::spawn_blocking(move || -> SyncResult<VirtualNamespace> {
        let folders = resolve_data_folders(&workspace, &project, false)?;
        let libraries = resolve_libraries(&workspace, &project);
        Ok(index::rebuild(&project.id, &folders, &libraries, &hashes, &config))
    })
    .await
    .map_err(|err| SyncError::Io(io::Error::other(err)))?
}

/// A deleted name that the rebuilt namespace still serves was shadowing
/// another file; report it as modified with the revealed file's mtime.
fn revealed(batch: Vec<ChangedFile>, ns: &VirtualNamespace) -> Vec<ChangedFile> {
    batch
        .into_iter()
        .map(|change| match ns.get(&change.name) {
            Some(entry) if change.deleted => ChangedFile::modified(change.name, entry.mtime_ms()),
            _ => change,
        })
        .collect()
}

fn translation_name(project_id: &str, config: &SyncConfig) -> String {
    format!(
        "/{}/{}",
        project_id,
        config.external_translation_alias.trim_start_matches('/')
    )
}

/// Decide whether a filtered watch event is an external change worth
/// reporting.
///
/// Our own writes are suppressed by the ledger. A file that exists with
/// content is reported only when its modification time differs from the
/// indexed one (or it is not indexed yet); a missing file is reported as
/// deleted. Files still being written (zero length) wait for their next
/// event.
pub(crate) fn evaluate(
    event: &WatchEvent,
    ns: &VirtualNamespace,
    ledger: &IgnoreLedger,
    config: &SyncConfig,
) -> Option<ChangedFile> {
    if ledger.is_suppressed(&event.path) {
        tracing::debug!("ignoring own write to {}", event.path.display());
        return None;
    }

    let name = if event.external_translation {
        translation_name(ns.project_id(), config)
    } else {
        match ns.virtual_path_for(&event.path) {
            Some(name) => name,
            None => {
                tracing::debug!("{} is outside every asset folder", event.path.display());
                return None;
            }
        }
    };

    match std::fs::metadata(&event.path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => {
            let mtime = meta.modified().map(system_time_ms).unwrap_or_default();
            let unchanged = !event.external_translation
                && ns
                    .entry_for_physical(&event.path)
                    .map(|entry| entry.mtime_ms() == mtime)
                    .unwrap_or(false);
            if unchanged {
                None
            } else {
                Some(ChangedFile::modified(name, mtime))
            }
        }
        Ok(_) => None,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Some(ChangedFile::deleted(name)),
        Err(err) => {
            tracing::warn!("can not inspect {}: {}", event.path.display(), err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{AssetType, DataFolder};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        img: PathBuf,
        ns: VirtualNamespace,
        ledger: IgnoreLedger,
        config: SyncConfig,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let img = temp.path().join("games/demo/img");
        fs::create_dir_all(&img).unwrap();
        fs::write(img.join("hero.png"), b"pixels").unwrap();
        let config = SyncConfig::default();
        let folders = vec![DataFolder {
            asset_type: AssetType::Image,
            path: img.clone(),
            library: None,
        }];
        let ns = index::rebuild("demo", &folders, &[], &HashStore::new(), &config);
        Fixture {
            temp,
            img,
            ns,
            ledger: IgnoreLedger::new(Duration::from_secs(2)),
            config,
        }
    }

    fn event(fx: &Fixture, name: &str) -> WatchEvent {
        WatchEvent {
            root: fx.img.clone(),
            path: fx.img.join(name),
            external_translation: false,
        }
    }

    #[test]
    fn unchanged_mtime_is_not_reported() {
        let fx = fixture();
        assert_eq!(evaluate(&event(&fx, "hero.png"), &fx.ns, &fx.ledger, &fx.config), None);
    }

    #[test]
    fn new_file_is_reported_with_its_mtime() {
        let fx = fixture();
        let path = fx.img.join("villain.png");
        fs::write(&path, b"evil").unwrap();
        let expected = system_time_ms(fs::metadata(&path).unwrap().modified().unwrap());

        let change =
            evaluate(&event(&fx, "villain.png"), &fx.ns, &fx.ledger, &fx.config).unwrap();
        assert_eq!(change, ChangedFile::modified("/demo/img/villain.png", expected));
    }

    #[test]
    fn missing_file_is_reported_deleted() {
        let fx = fixture();
        fs::remove_file(fx.img.join("hero.png")).unwrap();
        let change = evaluate(&event(&fx, "hero.png"), &fx.ns, &fx.ledger, &fx.config).unwrap();
        assert_eq!(change, ChangedFile::deleted("/demo/img/hero.png"));
    }

    #[test]
    fn suppressed_paths_are_dropped() {
        let fx = fixture();
        let path = fx.img.join("villain.png");
        fs::write(&path, b"evil").unwrap();
        fx.ledger.register(&path);
        assert_eq!(evaluate(&event(&fx, "villain.png"), &fx.ns, &fx.ledger, &fx.config), None);
    }

    #[test]
    fn empty_files_wait_for_the_writer() {
        let fx = fixture();
        fs::write(fx.img.join("partial.png"), b"").unwrap();
        assert_eq!(evaluate(&event(&fx, "partial.png"), &fx.ns, &fx.ledger, &fx.config), None);
    }

    #[test]
    fn external_translations_use_the_canonical_name() {
        let fx = fixture();
        let dir = fx.temp.path().join("i18n-shared");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("de.json"), b"{}").unwrap();
        let ev = WatchEvent {
            root: dir.clone(),
            path: dir.join("de.json"),
            external_translation: true,
        };
        let change = evaluate(&ev, &fx.ns, &fx.ledger, &fx.config).unwrap();
        assert_eq!(change.name, "/demo/i18n/en.json");
        assert!(!change.deleted);
    }

    #[test]
    fn refreshed_entries_are_not_reported_again() {
        let mut fx = fixture();
        let path = fx.img.join("hero.png");
        fs::write(&path, b"new pixels").unwrap();
        let meta = fs::metadata(&path).unwrap();
        fx.ns.refresh_entry(&path, meta.modified().unwrap(), meta.len());

        assert_eq!(evaluate(&event(&fx, "hero.png"), &fx.ns, &fx.ledger, &fx.config), None);
    }

    #[test]
    fn deletions_still_served_become_modifications() {
        let fx = fixture();
        let mtime = fx.ns.get("/demo/img/hero.png").unwrap().mtime_ms();
        let batch = vec![
            ChangedFile::deleted("/demo/img/hero.png"),
            ChangedFile::deleted("/demo/img/gone.png"),
        ];
        assert_eq!(
            revealed(batch, &fx.ns),
            vec![
                ChangedFile::modified("/demo/img/hero.png", mtime),
                ChangedFile::deleted("/demo/img/gone.png"),
            ]
        );
    }

    #[test]
    fn outcome_wire_form() {
        let ok = MutationOutcome::from(Ok(()));
        assert_eq!(serde_json::to_string(&ok).unwrap(), "{}");
        let failed = MutationOutcome::from(Err(SyncError::NotFound(PathBuf::from("/x.png"))));
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            serde_json::json!({"error": "file does not exist: /x.png"})
        );
    }

    #[test]
    fn delete_requests_back_up_by_default() {
        let request: MutationRequest =
            serde_json::from_str(r#"{"kind": "delete", "path": "/demo/img/a.png"}"#).unwrap();
        assert_eq!(
            request,
            MutationRequest::Delete {
                path: "/demo/img/a.png".into(),
                backup: true
            }
        );
    }
}
