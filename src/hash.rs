//! Content hashes for collision comparison.
//!
//! Hashing only happens for the minority of files that clash on a virtual
//! path, but the same clashes repeat on every rebuild, so hashes are cached
//! per path and reused while the file's modification time and size are
//! unchanged.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone)]
struct CachedHash {
    modified: SystemTime,
    size: u64,
    hash: String,
}

/// Thread-safe SHA-256 cache keyed by physical path.
#[derive(Debug, Default)]
pub struct HashStore {
    cache: DashMap<PathBuf, CachedHash>,
}

impl HashStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hex SHA-256 of the file's current content.
    pub fn hash_file(&self, path: &Path) -> io::Result<String> {
        let meta = std::fs::metadata(path)?;
        let modified = meta.modified()?;
        let size = meta.len();

        if let Some(cached) = self.cache.get(path) {
            if cached.modified == modified && cached.size == size {
                return Ok(cached.hash.clone());
            }
        }

        let content = std::fs::read(path)?;
        let hash = compute_hash(&content);
        self.cache.insert(
            path.to_path_buf(),
            CachedHash {
                modified,
                size,
                hash: hash.clone(),
            },
        );
        Ok(hash)
    }

    /// True when both files hold byte-identical content.
    pub fn same_content(&self, a: &Path, b: &Path) -> io::Result<bool> {
        if std::fs::metadata(a)?.len() != std::fs::metadata(b)?.len() {
            return Ok(false);
        }
        Ok(self.hash_file(a)? == self.hash_file(b)?)
    }

    /// Drop the cached hash for `path`.
    pub fn forget(&self, path: &Path) {
        self.cache.remove(path);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Compute SHA-256 hash of content
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
