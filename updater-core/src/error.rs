//! Error types for updater-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{FileName, SiteName, Status};

/// All errors that can arise from collection and manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the file path and serde_yaml line context.
    #[error("failed to parse manifest at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unknown file '{0}'")]
    UnknownFile(FileName),

    /// A name with `..`, `.`, empty or absolute components.
    #[error("invalid file name '{0}'")]
    InvalidName(FileName),

    #[error("unknown update site '{0}'")]
    UnknownSite(SiteName),

    /// Only local-only files can be assigned to a site.
    #[error("'{file}' is {status}, not local-only")]
    NotLocalOnly { file: FileName, status: Status },
}
