//! Access to update sites.
//!
//! [`Remote`] is the read side every installation needs; [`Transport`] is
//! the per-site write side used by the uploader. Directory sites (a plain
//! path or a `file://` URL) are implemented here:
//!
//! ```text
//! <site dir>/
//!   index.yaml              (published SiteIndex)
//!   index.yaml.lock         (held while an upload runs)
//!   objects/<checksum>      (file contents, content-addressed)
//! ```

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use updater_core::{FileName, RemoteEntry, RemoteVersion, SiteIndex, SiteName, UpdateSite};

use crate::error::{io_err, transport_err, SyncError};

pub const INDEX_FILE: &str = "index.yaml";
pub const LOCK_FILE: &str = "index.yaml.lock";
pub const OBJECTS_DIR: &str = "objects";

/// Read access to update sites.
pub trait Remote: Send + Sync {
    /// Current index of `site`.
    fn fetch_index(&self, site: &UpdateSite) -> Result<SiteIndex, SyncError>;

    /// Copy the published `version` of `name` to `dest`. Returns bytes written.
    fn download(
        &self,
        site: &UpdateSite,
        name: &FileName,
        version: &RemoteVersion,
        dest: &Path,
    ) -> Result<u64, SyncError>;

    /// Open the write side of `site`.
    fn connect(&self, site: &UpdateSite) -> Result<Box<dyn Transport>, SyncError>;
}

/// Write access to a single update site.
pub trait Transport: Send {
    fn login(&mut self) -> Result<(), SyncError>;

    /// Take the site's upload lock. `Ok(false)` when someone else holds it.
    fn try_lock(&mut self) -> Result<bool, SyncError>;

    fn unlock(&mut self) -> Result<(), SyncError>;

    /// The published index, `None` for a site that was never initialized.
    fn fetch_index(&mut self) -> Result<Option<SiteIndex>, SyncError>;

    /// Store the contents of `source` as `entry`. Not visible until the
    /// index listing it is published.
    fn upload(&mut self, name: &FileName, source: &Path, entry: &RemoteEntry)
        -> Result<(), SyncError>;

    fn publish_index(&mut self, index: &SiteIndex) -> Result<(), SyncError>;
}

// ---------------------------------------------------------------------------
// Directory sites
// ---------------------------------------------------------------------------

/// Directory behind a site URL: `file:///srv/site` or `/srv/site`.
pub fn site_dir(name: &SiteName, url: &str) -> Result<PathBuf, SyncError> {
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if url.contains("://") {
        return Err(transport_err(name, format!("unsupported URL '{url}'")));
    }
    Ok(PathBuf::from(url))
}

fn read_index(dir: &Path) -> Result<Option<SiteIndex>, SyncError> {
    let path = dir.join(INDEX_FILE);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(&path, e)),
    };
    Ok(Some(serde_yaml::from_str(&contents)?))
}

/// [`Remote`] for directory sites.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirRemote;

impl Remote for DirRemote {
    fn fetch_index(&self, site: &UpdateSite) -> Result<SiteIndex, SyncError> {
        let dir = site_dir(&site.name, &site.url)?;
        read_index(&dir)?
            .ok_or_else(|| transport_err(&site.name, format!("no index at {}", dir.display())))
    }

    fn download(
        &self,
        site: &UpdateSite,
        name: &FileName,
        version: &RemoteVersion,
        dest: &Path,
    ) -> Result<u64, SyncError> {
        let source = site_dir(&site.name, &site.url)?
            .join(OBJECTS_DIR)
            .join(&version.checksum);
        tracing::debug!("downloading {name} from {}", source.display());
        std::fs::copy(&source, dest).map_err(|e| io_err(&source, e))
    }

    fn connect(&self, site: &UpdateSite) -> Result<Box<dyn Transport>, SyncError> {
        let upload = site.upload.as_ref().ok_or_else(|| SyncError::NotUploadable {
            site: site.name.clone(),
        })?;
        let target = upload.directory.as_deref().unwrap_or(&site.url);
        Ok(Box::new(DirSite::new(
            site.name.clone(),
            site_dir(&site.name, target)?,
        )))
    }
}

/// [`Transport`] writing into one site directory.
#[derive(Debug)]
pub struct DirSite {
    name: SiteName,
    dir: PathBuf,
    locked: bool,
}

impl DirSite {
    pub fn new(name: SiteName, dir: PathBuf) -> Self {
        Self {
            name,
            dir,
            locked: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }
}

impl Transport for DirSite {
    fn login(&mut self) -> Result<(), SyncError> {
        if !self.dir.is_dir() {
            return Err(transport_err(
                &self.name,
                format!("{} is not a directory", self.dir.display()),
            ));
        }
        Ok(())
    }

    fn try_lock(&mut self) -> Result<bool, SyncError> {
        let path = self.lock_path();
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                self.locked = true;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    fn unlock(&mut self) -> Result<(), SyncError> {
        if !self.locked {
            return Ok(());
        }
        let path = self.lock_path();
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&path, e)),
        }
        self.locked = false;
        Ok(())
    }

    fn fetch_index(&mut self) -> Result<Option<SiteIndex>, SyncError> {
        read_index(&self.dir)
    }

    fn upload(
        &mut self,
        name: &FileName,
        source: &Path,
        entry: &RemoteEntry,
    ) -> Result<(), SyncError> {
        let objects = self.dir.join(OBJECTS_DIR);
        std::fs::create_dir_all(&objects).map_err(|e| io_err(&objects, e))?;
        let target = objects.join(&entry.checksum);
        if target.exists() {
            tracing::debug!("{name}: object {} already present", entry.checksum);
            return Ok(());
        }
        let tmp = objects.join(format!("{}.tmp", entry.checksum));
        std::fs::copy(source, &tmp).map_err(|e| io_err(source, e))?;
        if let Err(e) = std::fs::rename(&tmp, &target) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&target, e));
        }
        Ok(())
    }

    fn publish_index(&mut self, index: &SiteIndex) -> Result<(), SyncError> {
        let path = self.dir.join(INDEX_FILE);
        let tmp = self.dir.join(format!("{INDEX_FILE}.tmp"));
        let yaml = serde_yaml::to_string(index)?;
        std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&path, e));
        }
        tracing::info!("published index for {} ({} files)", self.name, index.files.len());
        Ok(())
    }
}
