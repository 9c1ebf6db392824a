//! Update sites and their published indexes.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{FileName, RemoteVersion, SiteName};

/// Upload credentials for a site. A site without them is read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UploadConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Upload target; defaults to the site URL for directory sites.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

/// A named remote repository of files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSite {
    pub name: SiteName,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadConfig>,
    /// Index timestamp seen on the last successful refresh or upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl UpdateSite {
    pub fn new(name: impl Into<SiteName>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            upload: None,
            timestamp: None,
            description: None,
        }
    }

    pub fn with_upload(mut self, upload: UploadConfig) -> Self {
        self.upload = Some(upload);
        self
    }

    pub fn is_uploadable(&self) -> bool {
        self.upload.is_some()
    }
}

/// One file as listed in a site index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub checksum: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub filesize: u64,
    #[serde(default)]
    pub executable: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub dependencies: BTreeSet<FileName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RemoteEntry {
    pub fn version(&self) -> RemoteVersion {
        RemoteVersion {
            checksum: self.checksum.clone(),
            timestamp: self.timestamp,
            filesize: self.filesize,
        }
    }
}

/// The manifest a site publishes: every file it currently offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SiteIndex {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub files: BTreeMap<FileName, RemoteEntry>,
}
