//! Updater core library: tracked-file records, update sites, the collection
//! registry, dependency closure and manifest persistence.
//!
//! - [`types`]: newtypes, [`Status`], [`Action`], [`FileRecord`]
//! - [`site`]: update sites and site indexes
//! - [`collection`]: the [`Collection`] registry
//! - [`dependencies`]: implicated files and consistency checks
//! - [`manifest`]: load / save
//! - [`summary`]: pending-work summary

pub mod collection;
pub mod dependencies;
pub mod error;
pub mod manifest;
pub mod paths;
pub mod site;
pub mod summary;
pub mod types;

pub use collection::Collection;
pub use dependencies::{ConsistencyIssue, DependencyMap, IssueKind};
pub use error::ManifestError;
pub use site::{RemoteEntry, SiteIndex, UpdateSite, UploadConfig};
pub use summary::{human_size, ChangeSummary};
pub use types::{Action, FileName, FileRecord, RemoteVersion, SiteName, Status};
