//! Engine configuration.
//!
//! Every timing constant and filter used by the overlay and sync engine is
//! a field here. All fields are optional in the TOML file; missing ones take
//! the defaults below.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::resolver::AssetType;
use crate::retry::RetryPolicy;

/// File name looked up in the workspace root by [`SyncConfig::load_or_default`].
pub const CONFIG_FILE_NAME: &str = "asset-vfs.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory under the workspace that holds projects.
    pub projects_dir: String,

    /// Descriptor file name inside a project directory.
    pub descriptor_file: String,

    /// Per-library settings file merged into the namespace settings.
    pub library_settings_file: String,

    /// Names starting with this prefix are internal (backups, temp files).
    pub reserved_prefix: String,

    /// Extensions enumerated into the namespace.
    pub asset_extensions: Vec<String>,

    /// Extensions whose changes are reported by the watcher.
    pub watch_extensions: Vec<String>,

    /// Debounce window for outgoing change batches.
    pub settling_window_ms: u64,

    /// How long a self-write suppresses watcher events for its path.
    pub ignore_window_ms: u64,

    /// Delay before a raw event is re-checked against the disk.
    pub recheck_delay_ms: u64,

    /// Age after which backup artifacts are pruned.
    pub backup_retention_hours: u64,

    /// How repeated deletes of an unchanged file are recognized.
    pub backup_dedup: BackupDedup,

    /// Retry policy shared by every file mutation.
    pub retry: RetryPolicy,

    /// Exemptions from content comparison when a file is shadowed.
    pub shadow_rules: Vec<ShadowRule>,

    /// Library settings keys merged entry-by-entry instead of overwritten.
    pub merged_settings_keys: Vec<String>,

    /// Name under which any external translation change is reported,
    /// relative to the project's virtual root.
    pub external_translation_alias: String,
}

/// Decides when a repeated `delete(path, backup = true)` is redundant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupDedup {
    /// Same size as the last backup of this path. Same-size edits are missed.
    Size,
    /// Same size and same content hash.
    SizeAndHash,
}

/// Within `asset_type`, only shadowed files with one of `compare_extensions`
/// are content-compared; the rest are dropped silently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowRule {
    pub asset_type: AssetType,
    pub compare_extensions: Vec<String>,
}

impl ShadowRule {
    /// Whether a shadowed file of this type and extension needs hashing.
    pub fn compares(&self, extension: &str) -> bool {
        self.compare_extensions
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(extension))
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            projects_dir: "games".into(),
            descriptor_file: "thing-project.json".into(),
            library_settings_file: "settings.json".into(),
            reserved_prefix: "~".into(),
            asset_extensions: strings(&[
                "js", "json", "xml", "atlas", "png", "jpg", "webp", "svg", "wav", "mp3", "ogg",
                "aac", "weba",
            ]),
            watch_extensions: strings(&["json", "png", "wav", "jpg", "js"]),
            settling_window_ms: 500,
            ignore_window_ms: 2_000,
            recheck_delay_ms: 100,
            backup_retention_hours: 48,
            backup_dedup: BackupDedup::Size,
            retry: RetryPolicy::default(),
            shadow_rules: vec![ShadowRule {
                asset_type: AssetType::Sound,
                compare_extensions: strings(&["wav"]),
            }],
            merged_settings_keys: strings(&[
                "loadOnDemandTextures",
                "__loadOnDemandTexturesFolders",
            ]),
            external_translation_alias: "i18n/en.json".into(),
        }
    }
}

impl SyncConfig {
    /// Parse a TOML configuration file.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|source| SyncError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `asset-vfs.toml` from the workspace root, or fall back to defaults.
    pub fn load_or_default(workspace: &Path) -> SyncResult<Self> {
        let path = workspace.join(CONFIG_FILE_NAME);
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn settling_window(&self) -> Duration {
        Duration::from_millis(self.settling_window_ms)
    }

    pub fn ignore_window(&self) -> Duration {
        Duration::from_millis(self.ignore_window_ms)
    }

    pub fn recheck_delay(&self) -> Duration {
        Duration::from_millis(self.recheck_delay_ms)
    }

    pub fn backup_retention(&self) -> Duration {
        Duration::from_secs(self.backup_retention_hours * 60 * 60)
    }

    /// True when `name` starts with the reserved internal prefix.
    pub fn is_reserved(&self, name: &str) -> bool {
        !self.reserved_prefix.is_empty() && name.starts_with(&self.reserved_prefix)
    }

    pub fn is_asset_file(&self, path: &Path) -> bool {
        has_extension(path, &self.asset_extensions)
    }

    pub fn is_watched_file(&self, path: &Path) -> bool {
        has_extension(path, &self.watch_extensions)
    }

    /// The shadow rule governing `asset_type`, if any.
    pub fn shadow_rule(&self, asset_type: AssetType) -> Option<&ShadowRule> {
        self.shadow_rules.iter().find(|r| r.asset_type == asset_type)
    }
}

fn has_extension(path: &Path, allowed: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_editor_timings() {
        let config = SyncConfig::default();
        assert_eq!(config.settling_window(), Duration::from_millis(500));
        assert_eq!(config.ignore_window(), Duration::from_secs(2));
        assert_eq!(config.backup_retention(), Duration::from_secs(2 * 24 * 3600));
        assert_eq!(config.retry.max_attempts, 20);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"
settling_window_ms = 250
backup_dedup = "size-and-hash"

[retry]
max_attempts = 3
"#,
        )
        .unwrap();

        let config = SyncConfig::load_or_default(temp.path()).unwrap();
        assert_eq!(config.settling_window_ms, 250);
        assert_eq!(config.backup_dedup, BackupDedup::SizeAndHash);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.interval_ms, 1_000);
        assert_eq!(config.reserved_prefix, "~");
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.toml");
        std::fs::write(&path, "settling_window_ms = \"soon\"").unwrap();
        assert!(matches!(SyncConfig::load(&path), Err(SyncError::Config { .. })));
    }

    #[test]
    fn extension_filters() {
        let config = SyncConfig::default();
        assert!(config.is_asset_file(Path::new("img/hero.PNG")));
        assert!(config.is_asset_file(Path::new("snd/jump.ogg")));
        assert!(!config.is_watched_file(Path::new("snd/jump.ogg")));
        assert!(!config.is_asset_file(Path::new("notes.txt")));
        assert!(config.is_reserved("~deleted(a.png)20260101.log"));
    }

    #[test]
    fn sound_shadow_rule_only_compares_wav() {
        let config = SyncConfig::default();
        let rule = config.shadow_rule(AssetType::Sound).unwrap();
        assert!(rule.compares("wav"));
        assert!(!rule.compares("mp3"));
        assert!(config.shadow_rule(AssetType::Image).is_none());
    }
}
