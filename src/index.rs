//! Virtual namespace construction.
//!
//! A rebuild walks every resolved folder in priority order (project first,
//! then libraries in declaration order) and lets the first claimant of a
//! virtual path win. Shadowed candidates are compared by content: identical
//! copies vanish silently, differing ones are reported as [`Collision`]s.
//! The resulting [`VirtualNamespace`] is immutable; rebuilding produces a new
//! one.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

use crate::config::SyncConfig;
use crate::hash::HashStore;
use crate::resolver::{slash_path, AssetType, DataFolder, LibraryRef};

/// A physical file served under a virtual path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    pub physical: PathBuf,
    pub virtual_path: String,
    pub asset_type: AssetType,
    /// Owning library id; `None` when the project supplies the file.
    pub library: Option<String>,
    pub modified: SystemTime,
    pub size: u64,
}

impl AssetEntry {
    pub fn mtime_ms(&self) -> u64 {
        system_time_ms(self.modified)
    }
}

/// Two physical files claiming one virtual path with different content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collision {
    #[serde(rename = "assetPath")]
    pub asset_path: String,
    #[serde(rename = "winnerPhysicalPath")]
    pub winner: PathBuf,
    #[serde(rename = "shadowedPhysicalPath")]
    pub shadowed: PathBuf,
}

/// Immutable snapshot of the overlaid asset namespace.
#[derive(Debug, Clone, Default)]
pub struct VirtualNamespace {
    project_id: String,
    entries: IndexMap<String, AssetEntry>,
    by_physical: HashMap<PathBuf, String>,
    folders: Vec<DataFolder>,
    settings: Option<Value>,
    collisions: Vec<Collision>,
}

/// Enumeration payload handed to clients.
#[derive(Debug, Clone, Serialize)]
pub struct Enumeration {
    pub assets: BTreeMap<AssetType, Vec<AssetRecord>>,
    #[serde(rename = "libsSettings", skip_serializing_if = "Option::is_none")]
    pub libs_settings: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetRecord {
    pub name: String,
    pub mtime: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lib: Option<String>,
}

impl VirtualNamespace {
    /// A namespace with no folders and no entries.
    pub fn empty(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn get(&self, virtual_path: &str) -> Option<&AssetEntry> {
        self.entries.get(virtual_path)
    }

    pub fn contains(&self, virtual_path: &str) -> bool {
        self.entries.contains_key(virtual_path)
    }

    /// Active entry served from `physical`, if any.
    pub fn entry_for_physical(&self, physical: &Path) -> Option<&AssetEntry> {
        self.by_physical
            .get(physical)
            .and_then(|v| self.entries.get(v))
    }

    /// Virtual path of an indexed file, or the path it would get if it were
    /// indexed now (new files under a known folder).
    pub fn virtual_path_for(&self, physical: &Path) -> Option<String> {
        if let Some(v) = self.by_physical.get(physical) {
            return Some(v.clone());
        }
        self.folders
            .iter()
            .filter_map(|folder| {
                physical
                    .strip_prefix(&folder.path)
                    .ok()
                    .filter(|rel| !rel.as_os_str().is_empty())
                    .map(|rel| (folder, rel))
            })
            .max_by_key(|(folder, _)| folder.path.components().count())
            .map(|(folder, rel)| virtual_path(&self.project_id, folder, rel))
    }

    /// Record the current modification time and size of the entry served
    /// from `physical`. Returns `false` when no entry is served from there.
    pub fn refresh_entry(&mut self, physical: &Path, modified: SystemTime, size: u64) -> bool {
        let Some(vpath) = self.by_physical.get(physical) else {
            return false;
        };
        match self.entries.get_mut(vpath) {
            Some(entry) => {
                entry.modified = modified;
                entry.size = size;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssetEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn folders(&self) -> &[DataFolder] {
        &self.folders
    }

    pub fn collisions(&self) -> &[Collision] {
        &self.collisions
    }

    /// Library settings merged across all libraries, if any declared one.
    pub fn settings(&self) -> Option<&Value> {
        self.settings.as_ref()
    }

    /// Entries grouped by type, plus merged library settings.
    pub fn enumerate(&self) -> Enumeration {
        let mut assets: BTreeMap<AssetType, Vec<AssetRecord>> =
            AssetType::ALL.iter().map(|t| (*t, Vec::new())).collect();
        for entry in self.entries.values() {
            assets.entry(entry.asset_type).or_default().push(AssetRecord {
                name: entry.virtual_path.clone(),
                mtime: entry.mtime_ms(),
                lib: entry.library.clone(),
            });
        }
        Enumeration {
            assets,
            libs_settings: self.settings.clone(),
        }
    }
}

/// Virtual path of `relative` under `folder`.
///
/// Flattened types share `/<project>/<type>/...` across project and
/// libraries; source types are qualified by their owner.
pub fn virtual_path(project_id: &str, folder: &DataFolder, relative: &Path) -> String {
    let owner = if folder.asset_type.is_source() {
        folder.library.as_deref().unwrap_or(project_id)
    } else {
        project_id
    };
    format!(
        "/{}/{}/{}",
        owner.trim_matches('/'),
        folder.asset_type.folder(),
        slash_path(relative)
    )
}

/// Build a fresh namespace from `folders`.
///
/// Runs to completion; unreadable directories and files that disappear
/// mid-walk are logged and skipped.
pub fn rebuild(
    project_id: &str,
    folders: &[DataFolder],
    libraries: &[LibraryRef],
    hashes: &HashStore,
    config: &SyncConfig,
) -> VirtualNamespace {
    let start = Instant::now();
    let mut ns = VirtualNamespace {
        project_id: project_id.to_string(),
        folders: folders.to_vec(),
        ..Default::default()
    };

    let by_priority = folders
        .iter()
        .filter(|f| !f.is_library())
        .chain(folders.iter().filter(|f| f.is_library()));

    for folder in by_priority {
        for (physical, modified, size) in walk_folder(&folder.path, config) {
            let Ok(relative) = physical.strip_prefix(&folder.path) else {
                continue;
            };
            let vpath = virtual_path(project_id, folder, relative);

            if let Some(winner) = ns.entries.get(&vpath) {
                let shadowed = check_shadowed(winner, &physical, folder.asset_type, hashes, config);
                if let Some(collision) = shadowed {
                    tracing::debug!(
                        "collision at {}: {} shadows {}",
                        collision.asset_path,
                        collision.winner.display(),
                        collision.shadowed.display()
                    );
                    ns.collisions.push(collision);
                }
                continue;
            }

            ns.by_physical.insert(physical.clone(), vpath.clone());
            ns.entries.insert(
                vpath.clone(),
                AssetEntry {
                    physical,
                    virtual_path: vpath,
                    asset_type: folder.asset_type,
                    library: folder.library.clone(),
                    modified,
                    size,
                },
            );
        }
    }

    ns.settings = merge_library_settings(libraries, config);

    tracing::debug!(
        "indexed {} assets from {} folders in {:?} ({} collisions)",
        ns.entries.len(),
        folders.len(),
        start.elapsed(),
        ns.collisions.len()
    );
    ns
}

fn check_shadowed(
    winner: &AssetEntry,
    candidate: &Path,
    asset_type: AssetType,
    hashes: &HashStore,
    config: &SyncConfig,
) -> Option<Collision> {
    let extension = candidate
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    if let Some(rule) = config.shadow_rule(asset_type) {
        if !rule.compares(extension) {
            return None;
        }
    }

    match hashes.same_content(&winner.physical, candidate) {
        Ok(true) => None,
        Ok(false) => Some(Collision {
            asset_path: winner.virtual_path.clone(),
            winner: winner.physical.clone(),
            shadowed: candidate.to_path_buf(),
        }),
        Err(err) => {
            tracing::warn!(
                "can not compare {} with {}: {}",
                candidate.display(),
                winner.physical.display(),
                err
            );
            None
        }
    }
}

/// Depth-first listing of non-empty asset files under `root`, skipping
/// anything whose name carries the reserved prefix.
fn walk_folder(root: &Path, config: &SyncConfig) -> Vec<(PathBuf, SystemTime, u64)> {
    if !root.is_dir() {
        return Vec::new();
    }
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !config.is_reserved(&e.file_name().to_string_lossy()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("skipping unreadable entry under {}: {}", root.display(), err);
                continue;
            }
        };
        if !entry.file_type().is_file() || !config.is_asset_file(entry.path()) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if meta.len() == 0 {
            continue;
        }
        let modified = meta.modified().unwrap_or(UNIX_EPOCH);
        files.push((entry.into_path(), modified, meta.len()));
    }
    files
}

/// Merge each library's settings file, in declaration order.
///
/// Top-level keys are overwritten by later libraries, except the configured
/// nested keys whose objects are merged entry by entry.
pub fn merge_library_settings(libraries: &[LibraryRef], config: &SyncConfig) -> Option<Value> {
    let mut merged: Option<Map<String, Value>> = None;

    for lib in libraries {
        let path = lib.root.join(&config.library_settings_file);
        if !path.is_file() {
            continue;
        }
        let parsed = std::fs::read(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_slice::<Value>(&raw).map_err(|e| e.to_string()));
        match parsed {
            Ok(Value::Object(incoming)) => merge_settings(
                merged.get_or_insert_with(Map::new),
                incoming,
                &config.merged_settings_keys,
            ),
            Ok(_) => tracing::warn!("ignoring {}: settings must be a JSON object", path.display()),
            Err(err) => tracing::warn!("JSON reading error in {}: {}", path.display(), err),
        }
    }

    merged.map(Value::Object)
}

fn merge_settings(
    acc: &mut Map<String, Value>,
    incoming: Map<String, Value>,
    nested_keys: &[String],
) {
    for (key, value) in incoming {
        if nested_keys.iter().any(|k| k == &key) {
            if let Value::Object(entries) = &value {
                if let Some(Value::Object(existing)) = acc.get_mut(&key) {
                    for (k, v) in entries {
                        existing.insert(k.clone(), v.clone());
                    }
                    continue;
                }
            }
        }
        acc.insert(key, value);
    }
}

pub(crate) fn system_time_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
