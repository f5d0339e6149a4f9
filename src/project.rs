//! Project descriptors and project discovery.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// Directories never descended into while discovering projects.
const SKIPPED_DIRS: [&str; 2] = [".git", "node_modules"];

/// Parsed project descriptor.
///
/// Only the fields the engine needs are typed; everything else is kept in
/// `extra` so the descriptor can be handed back to clients unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectDescriptor {
    /// Library references in declaration order.
    #[serde(default)]
    pub libs: Vec<String>,

    /// Workspace-relative translation files or folders maintained elsewhere.
    #[serde(
        default,
        rename = "__externalTranslations",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub external_translations: Vec<String>,

    /// Project directory relative to the projects dir. Filled in on load.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dir: String,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A located project: its id, root folder and descriptor.
#[derive(Debug, Clone)]
pub struct Project {
    pub id: String,
    pub root: PathBuf,
    pub descriptor: ProjectDescriptor,
}

impl Project {
    /// Load `<workspace>/<projects_dir>/<id>/<descriptor_file>`.
    pub fn load(workspace: &Path, id: &str, config: &SyncConfig) -> SyncResult<Self> {
        let id = id.trim_matches('/').to_string();
        let root = workspace.join(&config.projects_dir).join(&id);
        let descriptor_path = root.join(&config.descriptor_file);
        if !descriptor_path.is_file() {
            return Err(SyncError::ProjectNotFound {
                project: id,
                descriptor: descriptor_path,
            });
        }
        let mut descriptor = read_descriptor(&descriptor_path)?;
        descriptor.dir = id.clone();
        Ok(Self {
            id,
            root,
            descriptor,
        })
    }

    /// Re-read the descriptor from disk, keeping id and root.
    pub fn reload(&self, config: &SyncConfig) -> SyncResult<Self> {
        let path = self.root.join(&config.descriptor_file);
        if !path.is_file() {
            return Err(SyncError::ProjectNotFound {
                project: self.id.clone(),
                descriptor: path,
            });
        }
        let mut descriptor = read_descriptor(&path)?;
        descriptor.dir = self.id.clone();
        Ok(Self {
            id: self.id.clone(),
            root: self.root.clone(),
            descriptor,
        })
    }
}

fn read_descriptor(path: &Path) -> SyncResult<ProjectDescriptor> {
    let raw = std::fs::read(path)?;
    serde_json::from_slice(&raw).map_err(|source| SyncError::Descriptor {
        path: path.to_path_buf(),
        source,
    })
}

/// Discover every project under the projects dir.
///
/// A directory holding a descriptor is a project and is not descended into;
/// other directories are searched recursively, so projects may be nested in
/// grouping folders (`group/demo`). Unparseable descriptors are logged and
/// skipped.
pub fn list_projects(workspace: &Path, config: &SyncConfig) -> SyncResult<Vec<ProjectDescriptor>> {
    let mut found = Vec::new();
    let base = workspace.join(&config.projects_dir);
    collect_projects(&base, "", config, &mut found)?;
    found.sort_by(|a, b| a.dir.cmp(&b.dir));
    Ok(found)
}

fn collect_projects(
    dir: &Path,
    sub_dir: &str,
    config: &SyncConfig,
    found: &mut Vec<ProjectDescriptor>,
) -> SyncResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if SKIPPED_DIRS.contains(&name.as_str()) || !entry.path().is_dir() {
            continue;
        }
        let rel = if sub_dir.is_empty() {
            name
        } else {
            format!("{sub_dir}/{name}")
        };
        let descriptor_path = entry.path().join(&config.descriptor_file);
        if descriptor_path.is_file() {
            match read_descriptor(&descriptor_path) {
                Ok(mut desc) => {
                    desc.dir = rel;
                    found.push(desc);
                }
                Err(err) => tracing::warn!("skipping project {}: {}", rel, err),
            }
        } else {
            collect_projects(&entry.path(), &rel, config, found)?;
        }
    }
    Ok(())
}
