//! Batch entrypoints shared by the CLI and the worker.
//!
//! Each function resolves dependencies, runs the installer or uploader, and
//! persists the manifest. A batch that fails resolution never touches disk.

use tokio_util::sync::CancellationToken;

use updater_core::{manifest, Action, Collection, FileName, ManifestError, SiteName};

use crate::error::SyncError;
use crate::installer::{self, InstallReport};
use crate::progress::Progress;
use crate::resolver::{self, Resolution};
use crate::transport::Remote;
use crate::uploader::{self, UploadReport};

fn resolve_or_fail(files: &mut Collection, for_upload: bool) -> Result<(), SyncError> {
    match resolver::resolve(files, for_upload) {
        Resolution::Resolved { added } => {
            for name in &added {
                tracing::info!("{name} added as a dependency");
            }
            Ok(())
        }
        conflicts => Err(SyncError::DependencyConflict(
            conflicts.diagnostic().unwrap_or_default(),
        )),
    }
}

fn save(files: &Collection) -> Result<(), SyncError> {
    manifest::save_at(files).map_err(SyncError::ManifestWrite)
}

/// Save after a batch. A batch error wins over a save error, which is
/// only logged in that case.
fn save_after<T>(files: &Collection, result: Result<T, SyncError>) -> Result<T, SyncError> {
    match (result, save(files)) {
        (Err(e), Err(save_err)) => {
            tracing::warn!("batch failed ({e}); manifest not saved: {save_err}");
            Err(e)
        }
        (Ok(_), Err(save_err)) => Err(save_err),
        (result, Ok(())) => result,
    }
}

/// Apply all pending local actions. The manifest is saved even when the
/// batch is canceled part-way, so completed files keep their new state.
pub fn apply_changes(
    files: &mut Collection,
    remote: &dyn Remote,
    progress: &mut dyn Progress,
    cancel: &CancellationToken,
) -> Result<InstallReport, SyncError> {
    resolve_or_fail(files, false)?;
    let result = installer::install(files, remote, progress, cancel);
    save_after(files, result)
}

/// Publish the pending UPLOAD/REMOVE actions for `site`.
pub fn upload_changes(
    files: &mut Collection,
    remote: &dyn Remote,
    site: &SiteName,
    progress: &mut dyn Progress,
    cancel: &CancellationToken,
) -> Result<UploadReport, SyncError> {
    resolve_or_fail(files, true)?;
    let config = files
        .site(site)
        .cloned()
        .ok_or_else(|| ManifestError::UnknownSite(site.clone()))?;
    let mut transport = remote.connect(&config)?;
    let report = uploader::upload(files, site, transport.as_mut(), progress, cancel)?;
    save(files)?;
    Ok(report)
}

/// Install or update a single file in isolation, leaving every other
/// pending action untouched. Returns an empty report if the file is
/// already current.
pub fn update_single(
    files: &mut Collection,
    name: &FileName,
    remote: &dyn Remote,
    progress: &mut dyn Progress,
    cancel: &CancellationToken,
) -> Result<InstallReport, SyncError> {
    let record = files
        .get(name)
        .ok_or_else(|| ManifestError::UnknownFile(name.clone()))?;
    let mut subset = files.clone_subset(std::iter::once(record));
    if !subset.set_first_valid_action(name, &[Action::Update, Action::Install]) {
        tracing::info!("{name} is already current");
        return Ok(InstallReport::default());
    }

    let result = installer::install(&mut subset, remote, progress, cancel);
    if let Some(updated) = subset.get(name) {
        let pending = files.get(name).map(|r| r.action()).unwrap_or_default();
        let mut updated = updated.clone();
        if updated.action() == Action::None && pending != Action::None {
            updated.set_action(pending, files.is_uploadable(&updated));
        }
        files.insert(updated);
    }
    save_after(files, result)
}

/// Publish an empty index on a fresh site. See [`uploader::initialize`].
pub fn initialize_site(
    files: &mut Collection,
    remote: &dyn Remote,
    site: &SiteName,
) -> Result<bool, SyncError> {
    let config = files
        .site(site)
        .cloned()
        .ok_or_else(|| ManifestError::UnknownSite(site.clone()))?;
    let mut transport = remote.connect(&config)?;
    let created = uploader::initialize(files, site, transport.as_mut())?;
    save(files)?;
    Ok(created)
}
