//! Local and remote refresh of a [`Collection`] and status derivation.
//!
//! Refreshing only ever changes a record's status and metadata. Actions are
//! left alone except where the new status no longer admits them, in which
//! case they are dropped with a warning.

use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use updater_core::{paths, Action, Collection, FileName, FileRecord, SiteName, Status};

use crate::checksum::{self, ChecksumCacheFile};
use crate::error::SyncError;
use crate::transport::Remote;

/// Outcome of a remote refresh.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: Vec<SiteName>,
    /// Sites whose index could not be fetched; their previous data is kept.
    pub unreachable: Vec<(SiteName, String)>,
}

// ---------------------------------------------------------------------------
// Status derivation
// ---------------------------------------------------------------------------

/// Status implied by a record's local, recorded and remote checksums.
pub fn derive_status(record: &FileRecord) -> Status {
    let remote = record.remote_version();
    let Some(local) = record.local_checksum.as_deref() else {
        return if remote.is_some() {
            Status::NotInstalled
        } else {
            Status::ObsoleteUninstalled
        };
    };
    if record.site.is_none() {
        return Status::LocalOnly;
    }
    let Some(remote) = remote else {
        return if record.checksum.is_none() {
            Status::New
        } else {
            Status::Obsolete
        };
    };
    if local == remote.checksum {
        Status::Installed
    } else if record.checksum.as_deref() == Some(local) {
        Status::Updateable
    } else if record.checksum.is_some() {
        Status::Modified
    } else if record
        .local_timestamp
        .is_some_and(|modified| modified > remote.timestamp)
    {
        Status::Modified
    } else {
        Status::Updateable
    }
}

fn rederive(files: &mut Collection, names: &[FileName]) {
    for name in names {
        if let Some(record) = files.get_mut(name) {
            let status = derive_status(record);
            if status == Status::Installed {
                record.checksum = record.local_checksum.clone();
            }
            record.set_status(status);
        }
    }
    for name in files.repair_actions() {
        tracing::warn!("{name}: pending action no longer applies after refresh; cleared");
    }
}

// ---------------------------------------------------------------------------
// Local refresh
// ---------------------------------------------------------------------------

/// Recompute local checksums and timestamps, then re-derive status.
///
/// With `Some(names)` only those records are touched. With `None` every
/// record is refreshed and files under the root that no record tracks are
/// added as local-only.
pub fn update_from_local(
    files: &mut Collection,
    names: Option<&[FileName]>,
) -> Result<(), SyncError> {
    let root = files.root().to_path_buf();
    let mut cache = checksum::load_cache_at(&root)?;

    let targets: Vec<FileName> = match names {
        Some(names) => names.iter().filter(|n| files.contains(n)).cloned().collect(),
        None => {
            for name in discover(&root) {
                if !files.contains(&name) {
                    tracing::debug!("discovered local-only file {name}");
                    files.insert(FileRecord::new(name, Status::LocalOnly));
                }
            }
            files.names()
        }
    };

    for name in &targets {
        let local = files
            .local_path(name)
            .and_then(|path| local_state(name, &path, &mut cache));
        if let Some(record) = files.get_mut(name) {
            match local {
                Some((checksum, size, modified)) => {
                    record.local_checksum = Some(checksum);
                    record.local_timestamp = Some(modified);
                    record.filesize = size;
                }
                None => {
                    record.local_checksum = None;
                    record.local_timestamp = None;
                }
            }
        }
    }

    cache.written_at = Utc::now();
    if let Err(e) = checksum::save_cache_at(&root, &cache) {
        tracing::warn!("could not save checksum cache: {e}");
    }
    rederive(files, &targets);
    Ok(())
}

/// `(checksum, size, mtime)` of a present, readable file.
fn local_state(
    name: &FileName,
    path: &Path,
    cache: &mut ChecksumCacheFile,
) -> Option<(String, u64, DateTime<Utc>)> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return None,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("{name}: cannot stat {}: {e}; treating as absent", path.display());
            return None;
        }
    };
    let size = metadata.len();
    let modified: DateTime<Utc> = metadata
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .into();
    if let Some(cached) = cache.lookup(name, size, modified) {
        return Some((cached.to_string(), size, modified));
    }
    match checksum::hash_file(path) {
        Ok(sum) => {
            cache.store(name.clone(), size, modified, sum.clone());
            Some((sum, size, modified))
        }
        Err(e) => {
            tracing::warn!("{name}: {e}; treating as absent");
            None
        }
    }
}

/// Every regular file under `root`, skipping the state directory.
fn discover(root: &Path) -> Vec<FileName> {
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() != 1 || entry.file_name() != paths::STATE_DIR);
    let mut names = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                if let Some(name) = paths::file_name_for(root, entry.path()) {
                    names.push(name);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("skipping unreadable entry: {e}"),
        }
    }
    names
}

// ---------------------------------------------------------------------------
// Remote refresh
// ---------------------------------------------------------------------------

/// Fetch every site's index and merge it into the collection.
pub fn update_from_remote(files: &mut Collection, remote: &dyn Remote) -> RefreshReport {
    let mut report = RefreshReport::default();
    let sites: Vec<_> = files.sites().cloned().collect();

    for site in sites {
        let index = match remote.fetch_index(&site) {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!("update site {} unreachable: {e}; keeping previous data", site.name);
                report.unreachable.push((site.name.clone(), e.to_string()));
                continue;
            }
        };

        for record_name in files.names() {
            if index.files.contains_key(&record_name) {
                continue;
            }
            if let Some(record) = files.get_mut(&record_name) {
                if record.remote.remove(&site.name).is_some() {
                    tracing::info!("{record_name} is no longer listed on {}", site.name);
                }
            }
        }

        for (name, entry) in &index.files {
            if !paths::is_valid_name(name) {
                tracing::warn!("{}: ignoring index entry with invalid name '{name}'", site.name);
                continue;
            }
            if !files.contains(name) {
                files.insert(FileRecord::new(name.clone(), Status::NotInstalled));
            }
            let Some(record) = files.get_mut(name) else {
                continue;
            };
            record.remote.insert(site.name.clone(), entry.version());
            if record.site.is_none() {
                record.site = Some(site.name.clone());
            }
            let owns = record.site.as_ref() == Some(&site.name);
            if owns && record.action() != Action::Upload {
                record.dependencies = entry.dependencies.clone();
                record.executable = entry.executable;
                record.description = entry.description.clone();
            }
        }

        if let Some(known) = files.site_mut(&site.name) {
            known.timestamp = Some(index.timestamp);
        }
        report.refreshed.push(site.name);
    }

    let names = files.names();
    rederive(files, &names);
    report
}

/// Remote refresh, then a full local refresh.
pub fn update_all(files: &mut Collection, remote: &dyn Remote) -> Result<RefreshReport, SyncError> {
    let report = update_from_remote(files, remote);
    update_from_local(files, None)?;
    Ok(report)
}

/// Present files the installer would not be able to overwrite.
pub fn read_only_files(files: &Collection) -> Vec<FileName> {
    files
        .filter(|record| record.status().is_present_locally())
        .filter(|record| {
            files
                .local_path(&record.name)
                .and_then(|path| std::fs::metadata(path).ok())
                .is_some_and(|m| m.permissions().readonly())
        })
        .map(|record| record.name.clone())
        .collect()
}
