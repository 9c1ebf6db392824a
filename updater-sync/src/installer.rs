//! Installer: applies INSTALL, UPDATE and UNINSTALL actions to disk.
//!
//! ## Per-file protocol
//!
//! 1. Check for cancellation.
//! 2. Download into `.updater/staging/<checksum>`.
//! 3. Verify SHA-256 and size against the site's entry.
//! 4. Rename into place. If that fails the staged copy is kept and a
//!    deferred move is recorded in `.updater/deferred.yaml`.
//! 5. Set the executable bit (Unix) and record the installed checksum.
//!
//! Per-file failures are collected in [`InstallReport::failures`]; the batch
//! continues with the next file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use updater_core::{paths, Action, Collection, FileName, ManifestError, Status};

use crate::checksum;
use crate::error::{io_err, transport_err, SyncError};
use crate::progress::Progress;
use crate::transport::Remote;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InstallReport {
    pub installed: Vec<FileName>,
    pub uninstalled: Vec<FileName>,
    /// Files whose final move or removal waits for the next start.
    pub deferred: Vec<FileName>,
    pub failures: Vec<(FileName, SyncError)>,
}

impl InstallReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Deferred operations
// ---------------------------------------------------------------------------

/// A filesystem change that could not be made while the batch ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DeferredOp {
    Move { from: PathBuf, to: PathBuf },
    Remove { path: PathBuf },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DeferredFile {
    #[serde(default)]
    ops: Vec<DeferredOp>,
}

fn load_deferred(root: &Path) -> Result<Vec<DeferredOp>, SyncError> {
    let path = paths::deferred_path(root);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(&path, e)),
    };
    let file: DeferredFile = serde_yaml::from_str(&contents)?;
    Ok(file.ops)
}

fn save_deferred(root: &Path, ops: Vec<DeferredOp>) -> Result<(), SyncError> {
    let path = paths::deferred_path(root);
    if ops.is_empty() {
        return match std::fs::remove_file(&path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(io_err(&path, e)),
            _ => Ok(()),
        };
    }
    let dir = paths::state_dir(root);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    let yaml = serde_yaml::to_string(&DeferredFile { ops })?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))
}

/// Append `ops` to the deferred list of the installation at `root`.
pub fn schedule_deferred(root: &Path, ops: &[DeferredOp]) -> Result<(), SyncError> {
    if ops.is_empty() {
        return Ok(());
    }
    let mut all = load_deferred(root)?;
    all.extend_from_slice(ops);
    save_deferred(root, all)
}

/// Replay deferred operations. Ones that still fail stay scheduled.
/// Returns how many were applied.
pub fn apply_deferred(root: &Path) -> Result<usize, SyncError> {
    let ops = load_deferred(root)?;
    if ops.is_empty() {
        return Ok(0);
    }
    let mut remaining = Vec::new();
    let mut applied = 0;
    for op in ops {
        let result = match &op {
            DeferredOp::Move { from, to } => {
                if let Some(parent) = to.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                std::fs::rename(from, to)
            }
            DeferredOp::Remove { path } => match std::fs::remove_file(path) {
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        match result {
            Ok(()) => applied += 1,
            Err(e) => {
                tracing::warn!("deferred operation {op:?} still failing: {e}");
                remaining.push(op);
            }
        }
    }
    save_deferred(root, remaining)?;
    tracing::info!("applied {applied} deferred operation(s)");
    Ok(applied)
}

// ---------------------------------------------------------------------------
// install
// ---------------------------------------------------------------------------

/// Apply every local action in `files`, in name order.
///
/// Returns `SyncError::Canceled` if `cancel` fires between two files; the
/// files handled before that keep their new state.
pub fn install(
    files: &mut Collection,
    remote: &dyn Remote,
    progress: &mut dyn Progress,
    cancel: &CancellationToken,
) -> Result<InstallReport, SyncError> {
    let batch: Vec<(FileName, Action)> = files
        .filter(|record| record.action().is_local())
        .map(|record| (record.name.clone(), record.action()))
        .collect();
    let total: u64 = files.to_install().map(|r| r.download_size()).sum();

    let mut report = InstallReport::default();
    let mut deferred = Vec::new();
    let mut done = 0u64;
    progress.start("Applying changes");

    for (name, action) in batch {
        if cancel.is_cancelled() {
            progress.canceled();
            schedule_deferred(files.root(), &deferred)?;
            return Err(SyncError::Canceled);
        }
        let outcome = if action.installs() {
            let size = files.get(&name).map(|r| r.download_size()).unwrap_or(0);
            let outcome = install_one(files, remote, &name, &mut deferred);
            done += size;
            if outcome.is_ok() {
                report.installed.push(name.clone());
            }
            outcome
        } else {
            let outcome = uninstall_one(files, &name, &mut deferred);
            if outcome.is_ok() {
                report.uninstalled.push(name.clone());
            }
            outcome
        };
        match outcome {
            Ok(true) => report.deferred.push(name.clone()),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("{name}: {e}");
                report.failures.push((name.clone(), e));
            }
        }
        progress.tick(done, total, name.as_str());
    }

    schedule_deferred(files.root(), &deferred)?;
    progress.done();
    Ok(report)
}

/// Install or update one file. `Ok(true)` when the final move was deferred.
fn install_one(
    files: &mut Collection,
    remote: &dyn Remote,
    name: &FileName,
    deferred: &mut Vec<DeferredOp>,
) -> Result<bool, SyncError> {
    let record = files
        .get(name)
        .ok_or_else(|| ManifestError::UnknownFile(name.clone()))?;
    let site_name = record
        .site
        .clone()
        .ok_or_else(|| ManifestError::UnknownFile(name.clone()))?;
    let site = files
        .site(&site_name)
        .ok_or_else(|| ManifestError::UnknownSite(site_name.clone()))?;
    let version = record
        .remote_version()
        .cloned()
        .ok_or_else(|| transport_err(&site_name, format!("{name} is not listed")))?;
    let executable = record.executable;
    let target = files
        .local_path(name)
        .ok_or_else(|| ManifestError::InvalidName(name.clone()))?;

    let staging = paths::staging_dir(files.root());
    std::fs::create_dir_all(&staging).map_err(|e| io_err(&staging, e))?;
    let staged = staging.join(&version.checksum);

    if let Err(e) = remote.download(site, name, &version, &staged) {
        let _ = std::fs::remove_file(&staged);
        return Err(e);
    }
    let actual = checksum::hash_file(&staged)?;
    let size = std::fs::metadata(&staged)
        .map_err(|e| io_err(&staged, e))?
        .len();
    if actual != version.checksum || (version.filesize != 0 && size != version.filesize) {
        let _ = std::fs::remove_file(&staged);
        return Err(SyncError::ChecksumMismatch {
            file: name.clone(),
            expected: version.checksum,
            actual,
        });
    }

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let moved = match std::fs::rename(&staged, &target) {
        Ok(()) => {
            if executable {
                set_executable(&target)?;
            }
            true
        }
        Err(e) => {
            tracing::warn!("{name}: cannot replace {}: {e}; deferring", target.display());
            deferred.push(DeferredOp::Move {
                from: staged,
                to: target,
            });
            false
        }
    };

    if let Some(record) = files.get_mut(name) {
        record.checksum = Some(version.checksum.clone());
        record.local_checksum = Some(version.checksum.clone());
        record.local_timestamp = Some(Utc::now());
        record.filesize = size;
        record.set_status(Status::Installed);
        record.clear_action();
    }
    tracing::info!("installed {name}");
    Ok(!moved)
}

/// Uninstall one file. `Ok(true)` when the removal was deferred.
fn uninstall_one(
    files: &mut Collection,
    name: &FileName,
    deferred: &mut Vec<DeferredOp>,
) -> Result<bool, SyncError> {
    let path = files
        .local_path(name)
        .ok_or_else(|| ManifestError::InvalidName(name.clone()))?;
    let postponed = match std::fs::remove_file(&path) {
        Ok(()) => false,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!("{name}: cannot remove {}: {e}; deferring", path.display());
            deferred.push(DeferredOp::Remove { path });
            true
        }
    };

    let Some(record) = files.get_mut(name) else {
        return Ok(postponed);
    };
    record.local_checksum = None;
    record.local_timestamp = None;
    record.clear_action();
    if record.remote_version().is_some() {
        record.set_status(Status::NotInstalled);
    } else if record.site.is_some() {
        record.set_status(Status::ObsoleteUninstalled);
    } else {
        files.remove(name);
    }
    tracing::info!("uninstalled {name}");
    Ok(postponed)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<(), SyncError> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = std::fs::metadata(path)
        .map_err(|e| io_err(path, e))?
        .permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    std::fs::set_permissions(path, permissions).map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<(), SyncError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn deferred_removal_is_replayed() {
        let root = TempDir::new().unwrap();
        let victim = root.path().join("old.jar");
        std::fs::write(&victim, b"old").unwrap();

        schedule_deferred(root.path(), &[DeferredOp::Remove { path: victim.clone() }]).unwrap();
        assert!(paths::deferred_path(root.path()).exists());

        assert_eq!(apply_deferred(root.path()).unwrap(), 1);
        assert!(!victim.exists());
        assert!(!paths::deferred_path(root.path()).exists());
    }

    #[test]
    fn deferred_move_is_replayed_into_new_directory() {
        let root = TempDir::new().unwrap();
        let staged = root.path().join("staged");
        std::fs::write(&staged, b"new").unwrap();
        let target = root.path().join("plugins").join("a.jar");

        schedule_deferred(
            root.path(),
            &[DeferredOp::Move {
                from: staged.clone(),
                to: target.clone(),
            }],
        )
        .unwrap();
        assert_eq!(apply_deferred(root.path()).unwrap(), 1);
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
    }

    #[test]
    fn failing_deferred_op_stays_scheduled() {
        let root = TempDir::new().unwrap();
        let op = DeferredOp::Move {
            from: root.path().join("missing"),
            to: root.path().join("target"),
        };
        schedule_deferred(root.path(), &[op]).unwrap();
        assert_eq!(apply_deferred(root.path()).unwrap(), 0);
        assert_eq!(load_deferred(root.path()).unwrap().len(), 1);
    }

    #[test]
    fn nothing_deferred_is_a_no_op() {
        let root = TempDir::new().unwrap();
        assert_eq!(apply_deferred(root.path()).unwrap(), 0);
    }
}
