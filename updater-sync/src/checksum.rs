//! SHA-256 file checksums and the on-disk checksum cache.
//!
//! The cache persists a [`ChecksumCacheFile`] JSON document at
//! `<root>/.updater/checksums.json`, keyed by file name and gated on
//! `(size, mtime)` so unchanged files are not rehashed. Writes use the same
//! atomic `.tmp` + rename pattern as the manifest.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use updater_core::{paths, FileName};

use crate::error::{io_err, SyncError};

/// Hex-encoded SHA-256 of the file at `path`, read in 64 KiB chunks.
pub fn hash_file(path: &Path) -> Result<String, SyncError> {
    let mut file = std::fs::File::open(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).map_err(|e| io_err(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// One cached checksum, valid while size and mtime are unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedChecksum {
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub checksum: String,
}

/// On-disk checksum cache payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecksumCacheFile {
    pub written_at: DateTime<Utc>,
    #[serde(default)]
    pub files: BTreeMap<FileName, CachedChecksum>,
}

impl Default for ChecksumCacheFile {
    fn default() -> Self {
        Self {
            written_at: Utc::now(),
            files: BTreeMap::new(),
        }
    }
}

impl ChecksumCacheFile {
    /// Cached checksum for `name` if it was computed for this exact size and mtime.
    pub fn lookup(&self, name: &FileName, size: u64, modified: DateTime<Utc>) -> Option<&str> {
        self.files
            .get(name)
            .filter(|c| c.size == size && c.modified == modified)
            .map(|c| c.checksum.as_str())
    }

    pub fn store(&mut self, name: FileName, size: u64, modified: DateTime<Utc>, checksum: String) {
        self.files.insert(
            name,
            CachedChecksum {
                size,
                modified,
                checksum,
            },
        );
    }
}

/// Load the checksum cache. Returns an empty cache if the file does not yet
/// exist or cannot be parsed (it is only an optimisation).
pub fn load_cache_at(root: &Path) -> Result<ChecksumCacheFile, SyncError> {
    let path = paths::checksum_cache_path(root);
    if !path.exists() {
        return Ok(ChecksumCacheFile::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    match serde_json::from_str(&contents) {
        Ok(cache) => Ok(cache),
        Err(e) => {
            tracing::warn!("ignoring unreadable checksum cache {}: {e}", path.display());
            Ok(ChecksumCacheFile::default())
        }
    }
}

/// Save the checksum cache atomically.
pub fn save_cache_at(root: &Path, cache: &ChecksumCacheFile) -> Result<(), SyncError> {
    let path = paths::checksum_cache_path(root);
    let dir = paths::state_dir(root);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let json = serde_json::to_string_pretty(cache)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_cache_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let cache = load_cache_at(tmp.path()).unwrap();
        assert!(cache.files.is_empty());
    }

    #[test]
    fn roundtrip_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut cache = ChecksumCacheFile::default();
        let now = Utc::now();
        cache.store(FileName::from("jars/a.jar"), 3, now, "deadbeef".to_string());

        save_cache_at(tmp.path(), &cache).unwrap();
        let loaded = load_cache_at(tmp.path()).unwrap();
        assert_eq!(loaded.files, cache.files);
        assert_eq!(loaded.lookup(&FileName::from("jars/a.jar"), 3, now), Some("deadbeef"));
        assert_eq!(loaded.lookup(&FileName::from("jars/a.jar"), 4, now), None);
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let tmp = TempDir::new().unwrap();
        save_cache_at(tmp.path(), &ChecksumCacheFile::default()).unwrap();
        let tmp_path = paths::checksum_cache_path(tmp.path()).with_extension("json.tmp");
        assert!(!tmp_path.exists(), "tmp file should be removed after atomic rename");
    }

    #[test]
    fn corrupt_cache_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let path = paths::checksum_cache_path(tmp.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_cache_at(tmp.path()).unwrap().files.is_empty());
    }

    #[test]
    fn file_hash_matches_bytes_hash() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.txt");
        std::fs::write(&path, b"hello\n").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"hello\n"));
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
