//! Manifest persistence for a [`Collection`].
//!
//! # Storage layout
//!
//! ```text
//! <root>/
//!   .updater/               (mode 0700, created on first save)
//!     db.yaml               (manifest, mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every function takes the installation root explicitly; tests pass a
//! `TempDir`. Saving is atomic: serialize → `db.yaml.tmp` sibling →
//! `chmod 0600` → `rename`. On failure the previous manifest is untouched.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::error::ManifestError;
use crate::paths;
use crate::site::UpdateSite;
use crate::types::FileRecord;

/// Current on-disk format version.
pub const MANIFEST_VERSION: u32 = 1;

/// On-disk manifest payload.
#[derive(Debug, Serialize, Deserialize)]
struct ManifestFile {
    version: u32,
    written_at: DateTime<Utc>,
    #[serde(default)]
    sites: Vec<UpdateSite>,
    #[serde(default)]
    files: Vec<FileRecord>,
}

// ---------------------------------------------------------------------------
// 1. Load
// ---------------------------------------------------------------------------

/// Load the manifest of the installation at `root`.
///
/// Returns an empty collection if no manifest exists yet, and
/// `ManifestError::Parse` (with path + line context) if it is malformed.
/// Actions a record's status does not admit are dropped with a warning, and
/// entries whose name would resolve outside `root` are skipped.
pub fn load_at(root: &Path) -> Result<Collection, ManifestError> {
    let path = paths::manifest_path(root);
    if !path.exists() {
        return Ok(Collection::new(root));
    }
    let contents = std::fs::read_to_string(&path)?;
    let manifest: ManifestFile =
        serde_yaml::from_str(&contents).map_err(|e| ManifestError::Parse { path, source: e })?;

    let mut collection = Collection::new(root);
    for site in manifest.sites {
        collection.add_site(site);
    }
    for record in manifest.files {
        if !paths::is_valid_name(&record.name) {
            tracing::warn!("skipping manifest entry with invalid name '{}'", record.name);
            continue;
        }
        collection.insert(record);
    }
    for name in collection.repair_actions() {
        tracing::warn!("dropped inadmissible action for {name} while loading manifest");
    }
    Ok(collection)
}

// ---------------------------------------------------------------------------
// 2. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically write `collection` to `<root>/.updater/db.yaml`.
///
/// `.tmp` is always in the same directory as the target (same filesystem, so
/// the rename is atomic).
pub fn save_at(collection: &Collection) -> Result<(), ManifestError> {
    let dir = paths::state_dir(collection.root());
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    let path = paths::manifest_path(collection.root());
    let tmp_path = tmp_path_for(&path);

    let manifest = ManifestFile {
        version: MANIFEST_VERSION,
        written_at: Utc::now(),
        sites: collection.sites().cloned().collect(),
        files: collection.iter().cloned().collect(),
    };
    let yaml = serde_yaml::to_string(&manifest)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    if let Err(e) = std::fs::rename(&tmp_path, &path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    tracing::debug!("wrote manifest: {}", path.display());
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    path.with_file_name(format!("{}.tmp", paths::MANIFEST_FILE))
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ManifestError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ManifestError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ManifestError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ManifestError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, FileName, SiteName, Status};
    use tempfile::TempDir;

    fn sample(root: &Path) -> Collection {
        let mut files = Collection::new(root);
        files.add_site(UpdateSite::new("main", "file:///srv/main"));
        let mut record = FileRecord::new("plugins/a.jar", Status::NotInstalled);
        record.site = Some(SiteName::from("main"));
        files.insert(record);
        files.set_action(&FileName::from("plugins/a.jar"), Action::Install);
        files
    }

    #[test]
    fn missing_manifest_is_empty_collection() {
        let root = TempDir::new().expect("tempdir");
        let files = load_at(root.path()).expect("load");
        assert!(files.is_empty());
        assert_eq!(files.root(), root.path());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let root = TempDir::new().expect("tempdir");
        let files = sample(root.path());
        save_at(&files).expect("save");
        let loaded = load_at(root.path()).expect("load");
        assert_eq!(loaded, files);
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let root = TempDir::new().expect("tempdir");
        save_at(&sample(root.path())).expect("save");
        let tmp = tmp_path_for(&paths::manifest_path(root.path()));
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn state_dir_created_with_perms() {
        let root = TempDir::new().expect("tempdir");
        save_at(&sample(root.path())).expect("save");
        let dir = paths::state_dir(root.path());
        assert!(dir.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
    }
}
