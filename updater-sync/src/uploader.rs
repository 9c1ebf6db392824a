//! Uploader: publishes UPLOAD and REMOVE actions to one update site.
//!
//! The site lock is taken before anything is read and released on every exit
//! path through a scope guard. File contents go up first, in dependency
//! order; the new index is published last, so a failure part-way leaves the
//! site listing exactly what it listed before. Records are only updated once
//! the index is published.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use updater_core::{
    Action, Collection, FileName, ManifestError, RemoteEntry, SiteIndex, SiteName, Status,
};

use crate::checksum;
use crate::error::{io_err, SyncError};
use crate::progress::Progress;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub site: SiteName,
    pub uploaded: Vec<FileName>,
    pub removed: Vec<FileName>,
    /// Timestamp of the published index.
    pub timestamp: DateTime<Utc>,
}

/// Publish the pending UPLOAD/REMOVE actions for `site` through `transport`.
pub fn upload(
    files: &mut Collection,
    site: &SiteName,
    transport: &mut dyn Transport,
    progress: &mut dyn Progress,
    cancel: &CancellationToken,
) -> Result<UploadReport, SyncError> {
    let config = files
        .site(site)
        .ok_or_else(|| ManifestError::UnknownSite(site.clone()))?;
    if !config.is_uploadable() {
        return Err(SyncError::NotUploadable { site: site.clone() });
    }
    let known = config.timestamp;

    transport.login()?;
    if !transport.try_lock()? {
        return Err(SyncError::SiteLocked { site: site.clone() });
    }
    let mut transport = scopeguard::guard(transport, |transport| {
        if let Err(e) = transport.unlock() {
            tracing::warn!("failed to release lock on {site}: {e}");
        }
    });

    let current = transport.fetch_index()?.unwrap_or_default();
    let changed = match known {
        Some(known) => current.timestamp > known,
        None => !current.files.is_empty(),
    };
    if changed {
        return Err(SyncError::SiteChanged { site: site.clone() });
    }

    let mut uploads: Vec<FileName> = Vec::new();
    let mut removals: Vec<FileName> = Vec::new();
    for record in files.to_upload_or_remove(site) {
        match record.action() {
            Action::Upload => uploads.push(record.name.clone()),
            _ => removals.push(record.name.clone()),
        }
    }
    let uploads = dependency_order(files, &uploads);
    let total: u64 = uploads
        .iter()
        .filter_map(|name| files.get(name))
        .map(|r| r.filesize)
        .sum();

    progress.start(&format!("Uploading to {site}"));
    let now = Utc::now();
    let mut index = current.clone();
    let mut entries: Vec<(FileName, RemoteEntry)> = Vec::new();
    let mut done = 0u64;

    for name in &uploads {
        if cancel.is_cancelled() {
            progress.canceled();
            return Err(SyncError::Canceled);
        }
        let Some(record) = files.get(name) else {
            continue;
        };
        let path = files
            .local_path(name)
            .ok_or_else(|| ManifestError::InvalidName(name.clone()))?;
        // Hash what is on disk now; the file may have changed since refresh.
        let checksum = checksum::hash_file(&path)?;
        let filesize = std::fs::metadata(&path)
            .map_err(|e| io_err(&path, e))?
            .len();
        if record.local_checksum.as_deref() != Some(checksum.as_str()) {
            tracing::debug!("{name} changed since the last refresh");
        }
        let entry = RemoteEntry {
            checksum,
            timestamp: record.local_timestamp.unwrap_or(now),
            filesize,
            executable: record.executable,
            dependencies: record.dependencies.clone(),
            description: record.description.clone(),
        };
        transport.upload(name, &path, &entry)?;
        done += entry.filesize;
        progress.tick(done, total, name.as_str());
        index.files.insert(name.clone(), entry.clone());
        entries.push((name.clone(), entry));
    }
    for name in &removals {
        index.files.remove(name);
    }

    if cancel.is_cancelled() {
        progress.canceled();
        return Err(SyncError::Canceled);
    }
    index.timestamp = if now > current.timestamp {
        now
    } else {
        current.timestamp + Duration::milliseconds(1)
    };
    transport.publish_index(&index)?;
    drop(transport);

    for (name, entry) in &entries {
        if let Some(record) = files.get_mut(name) {
            record.site = Some(site.clone());
            record.checksum = Some(entry.checksum.clone());
            record.local_checksum = Some(entry.checksum.clone());
            record.filesize = entry.filesize;
            record.remote.insert(site.clone(), entry.version());
            record.set_status(Status::Installed);
            record.clear_action();
        }
    }
    for name in &removals {
        if let Some(record) = files.get_mut(name) {
            record.remote.remove(site);
            record.set_status(Status::ObsoleteUninstalled);
            record.clear_action();
        }
    }
    if let Some(config) = files.site_mut(site) {
        config.timestamp = Some(index.timestamp);
    }
    progress.done();
    tracing::info!(
        "{site}: uploaded {} file(s), removed {}",
        entries.len(),
        removals.len()
    );

    Ok(UploadReport {
        site: site.clone(),
        uploaded: entries.into_iter().map(|(name, _)| name).collect(),
        removed: removals,
        timestamp: index.timestamp,
    })
}

/// Publish an empty index on a site that has none yet. Returns `false` when
/// the site already has an index, whose timestamp is adopted instead.
pub fn initialize(
    files: &mut Collection,
    site: &SiteName,
    transport: &mut dyn Transport,
) -> Result<bool, SyncError> {
    let config = files
        .site(site)
        .ok_or_else(|| ManifestError::UnknownSite(site.clone()))?;
    if !config.is_uploadable() {
        return Err(SyncError::NotUploadable { site: site.clone() });
    }

    transport.login()?;
    if !transport.try_lock()? {
        return Err(SyncError::SiteLocked { site: site.clone() });
    }
    let mut transport = scopeguard::guard(transport, |transport| {
        if let Err(e) = transport.unlock() {
            tracing::warn!("failed to release lock on {site}: {e}");
        }
    });

    let (created, timestamp) = match transport.fetch_index()? {
        Some(existing) => (false, existing.timestamp),
        None => {
            let index = SiteIndex {
                timestamp: Utc::now(),
                ..Default::default()
            };
            transport.publish_index(&index)?;
            (true, index.timestamp)
        }
    };
    if let Some(config) = files.site_mut(site) {
        config.timestamp = Some(timestamp);
    }
    Ok(created)
}

/// `names` reordered so every file comes after the files it depends on.
/// Cycles are broken at the first file reached.
fn dependency_order(files: &Collection, names: &[FileName]) -> Vec<FileName> {
    let batch: BTreeSet<&FileName> = names.iter().collect();
    let mut ordered = Vec::with_capacity(names.len());
    let mut visiting = BTreeSet::new();
    let mut visited = BTreeSet::new();

    fn visit<'a>(
        name: &'a FileName,
        files: &Collection,
        batch: &BTreeSet<&'a FileName>,
        visiting: &mut BTreeSet<&'a FileName>,
        visited: &mut BTreeSet<&'a FileName>,
        ordered: &mut Vec<FileName>,
    ) {
        if visited.contains(name) || !visiting.insert(name) {
            return;
        }
        if let Some(record) = files.get(name) {
            for dep in &record.dependencies {
                if let Some(dep) = batch.get(dep) {
                    visit(*dep, files, batch, visiting, visited, ordered);
                }
            }
        }
        visiting.remove(name);
        visited.insert(name);
        ordered.push(name.clone());
    }

    for name in &batch {
        visit(*name, files, &batch, &mut visiting, &mut visited, &mut ordered);
    }
    ordered
}
