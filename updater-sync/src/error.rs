//! Error types for updater-sync.

use std::path::PathBuf;

use thiserror::Error;

use updater_core::{FileName, ManifestError, SiteName};

/// All errors that can arise from refresh, install and upload operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The batch was canceled between two files.
    #[error("operation canceled")]
    Canceled,

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: FileName,
        expected: String,
        actual: String,
    },

    /// The resolver could not make the batch consistent. One line per problem.
    #[error("dependency conflict:\n{0}")]
    DependencyConflict(String),

    #[error("update site '{site}' is locked by another upload")]
    SiteLocked { site: SiteName },

    /// The site index was republished since the last refresh.
    #[error("update site '{site}' changed since the last refresh; refresh and retry")]
    SiteChanged { site: SiteName },

    #[error("transport error for '{site}': {message}")]
    Transport { site: SiteName, message: String },

    /// The batch ran but its result could not be persisted.
    #[error("failed to write manifest: {0}")]
    ManifestWrite(#[source] ManifestError),

    #[error("update site '{site}' has no upload configuration")]
    NotUploadable { site: SiteName },

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (checksum cache).
    #[error("checksum cache JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error (site index, deferred operations).
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn transport_err(site: &SiteName, message: impl std::fmt::Display) -> SyncError {
    SyncError::Transport {
        site: site.clone(),
        message: message.to_string(),
    }
}
