//! Virtual ↔ physical path lookups over the current namespace snapshot.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::index::VirtualNamespace;

/// Shared pointer to the latest committed namespace.
///
/// Readers clone the inner `Arc` and keep a consistent snapshot for as long
/// as they hold it; a rebuild swaps in a whole new namespace at once.
#[derive(Debug, Clone)]
pub struct NamespaceHandle {
    current: Arc<RwLock<Arc<VirtualNamespace>>>,
}

impl NamespaceHandle {
    pub fn new(initial: VirtualNamespace) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    pub fn load(&self) -> Arc<VirtualNamespace> {
        self.current.read().clone()
    }

    /// Publish a new snapshot, returning the previous one.
    pub fn store(&self, next: VirtualNamespace) -> Arc<VirtualNamespace> {
        std::mem::replace(&mut *self.current.write(), Arc::new(next))
    }

    /// Edit the current snapshot in place. Readers holding the previous
    /// snapshot keep their copy untouched.
    pub fn update(&self, edit: impl FnOnce(&mut VirtualNamespace)) {
        let mut current = self.current.write();
        edit(Arc::make_mut(&mut *current));
    }
}

/// Stateless path translation for inbound file operations.
#[derive(Debug, Clone)]
pub struct PathMapper {
    workspace: PathBuf,
    project_id: String,
    project_root: PathBuf,
    namespace: NamespaceHandle,
}

impl PathMapper {
    pub fn new(
        workspace: impl Into<PathBuf>,
        project_id: impl Into<String>,
        project_root: impl Into<PathBuf>,
        namespace: NamespaceHandle,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            project_id: project_id.into(),
            project_root: project_root.into(),
            namespace,
        }
    }

    pub fn namespace(&self) -> &NamespaceHandle {
        &self.namespace
    }

    /// Physical location for `virtual_path`.
    ///
    /// Unindexed paths under the project's virtual root map into the project
    /// folder so brand-new files can be written; anything else is joined to
    /// the workspace. The result may not exist.
    pub fn to_physical(&self, virtual_path: &str) -> PathBuf {
        let virtual_path = virtual_path.split('?').next().unwrap_or_default();
        if let Some(entry) = self.namespace.load().get(virtual_path) {
            return entry.physical.clone();
        }
        self.to_owned_physical(virtual_path)
    }

    /// Physical location `virtual_path` would have if the project (or the
    /// workspace, outside the project's virtual root) owned it, ignoring
    /// whichever file currently serves it.
    pub fn to_owned_physical(&self, virtual_path: &str) -> PathBuf {
        let virtual_path = virtual_path.split('?').next().unwrap_or_default();
        let trimmed = virtual_path.trim_start_matches('/');
        let project_prefix = format!("{}/", self.project_id);
        match trimmed.strip_prefix(&project_prefix) {
            Some(rest) => join_slashed(&self.project_root, rest),
            None => join_slashed(&self.workspace, trimmed),
        }
    }

    /// Virtual path for `physical`, or the input unchanged when it lies
    /// outside every known folder.
    pub fn to_virtual(&self, physical: &Path) -> String {
        self.namespace
            .load()
            .virtual_path_for(physical)
            .unwrap_or_else(|| physical.to_string_lossy().into_owned())
    }
}

fn join_slashed(base: &Path, rel: &str) -> PathBuf {
    rel.split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .fold(base.to_path_buf(), |acc, seg| acc.join(seg))
}
