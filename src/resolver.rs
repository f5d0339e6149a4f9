//! Folder-set resolution across a project and its libraries.
//!
//! A project contributes assets from a fixed set of typed folders. Every
//! declared library contributes the same folder types from its own root.
//! The resolver returns them library-first in declaration order, with the
//! project's own folders appended last.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::{SyncError, SyncResult};
use crate::project::Project;

/// Semantic category of an asset folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AssetType {
    #[serde(rename = "snd")]
    Sound,
    #[serde(rename = "img")]
    Image,
    #[serde(rename = "src/scenes")]
    SourceScenes,
    #[serde(rename = "src/game-objects")]
    SourceGameObjects,
    #[serde(rename = "scenes")]
    Scenes,
    #[serde(rename = "prefabs")]
    Prefabs,
    #[serde(rename = "scripts")]
    Scripts,
    #[serde(rename = "i18n")]
    Localization,
}

impl AssetType {
    /// Every type, in scanning order.
    pub const ALL: [AssetType; 8] = [
        AssetType::Sound,
        AssetType::Image,
        AssetType::SourceScenes,
        AssetType::SourceGameObjects,
        AssetType::Scenes,
        AssetType::Prefabs,
        AssetType::Scripts,
        AssetType::Localization,
    ];

    /// Folder name relative to a project or library root.
    pub fn folder(&self) -> &'static str {
        match self {
            AssetType::Sound => "snd",
            AssetType::Image => "img",
            AssetType::SourceScenes => "src/scenes",
            AssetType::SourceGameObjects => "src/game-objects",
            AssetType::Scenes => "scenes",
            AssetType::Prefabs => "prefabs",
            AssetType::Scripts => "scripts",
            AssetType::Localization => "i18n",
        }
    }

    /// Source folders keep an owner-qualified virtual path instead of being
    /// flattened into the shared namespace.
    pub fn is_source(&self) -> bool {
        matches!(self, AssetType::SourceScenes | AssetType::SourceGameObjects)
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder())
    }
}

/// A declared library, resolved against the project or workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryRef {
    /// Reference exactly as written in the descriptor.
    pub declared: String,
    /// Physical library root.
    pub root: PathBuf,
    /// Identity used in owner-qualified virtual paths.
    pub id: String,
}

impl LibraryRef {
    /// `./`-style references are relative to the project, everything else to
    /// the workspace.
    pub fn resolve(workspace: &Path, project_root: &Path, declared: &str) -> Self {
        let joined = if declared.starts_with('.') {
            project_root.join(declared)
        } else {
            workspace.join(declared.trim_start_matches('/'))
        };
        let root = normalize(&joined);
        let id = root
            .strip_prefix(workspace)
            .ok()
            .map(slash_path)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| declared.trim_matches('/').to_string());
        Self {
            declared: declared.to_string(),
            root,
            id,
        }
    }
}

/// A typed folder contributing assets to the namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFolder {
    pub asset_type: AssetType,
    pub path: PathBuf,
    /// Owning library id; `None` for the project's own folders.
    pub library: Option<String>,
}

impl DataFolder {
    pub fn is_library(&self) -> bool {
        self.library.is_some()
    }
}

/// Compute the ordered folder set for `project`.
///
/// Fails with [`SyncError::MissingLibrary`] if any declared library root is
/// missing, even when the others resolve.
pub fn resolve_data_folders(
    workspace: &Path,
    project: &Project,
    include_non_existing: bool,
) -> SyncResult<Vec<DataFolder>> {
    let mut folders = Vec::new();

    for declared in &project.descriptor.libs {
        let lib = LibraryRef::resolve(workspace, &project.root, declared);
        if !lib.root.is_dir() {
            return Err(SyncError::MissingLibrary {
                library: declared.clone(),
                root: lib.root,
            });
        }
        for asset_type in AssetType::ALL {
            let path = lib.root.join(asset_type.folder());
            if path.is_dir() {
                folders.push(DataFolder {
                    asset_type,
                    path,
                    library: Some(lib.id.clone()),
                });
            }
        }
    }

    for asset_type in AssetType::ALL {
        let path = project.root.join(asset_type.folder());
        if include_non_existing || path.is_dir() {
            folders.push(DataFolder {
                asset_type,
                path,
                library: None,
            });
        }
    }

    Ok(folders)
}

/// Resolved library list for a project, in declaration order.
pub fn resolve_libraries(workspace: &Path, project: &Project) -> Vec<LibraryRef> {
    project
        .descriptor
        .libs
        .iter()
        .map(|declared| LibraryRef::resolve(workspace, &project.root, declared))
        .collect()
}

/// Lexically collapse `.` and `..` components.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Join path components with `/` regardless of platform.
pub(crate) fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(seg) => Some(seg.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
