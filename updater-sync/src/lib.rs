//! # updater-sync
//!
//! Checksumming, dependency resolution, installation and upload for an
//! updater [`Collection`](updater_core::Collection).
//!
//! Call [`checksummer::update_all`] to refresh a collection, then
//! [`pipeline::apply_changes`] or [`pipeline::upload_changes`] to run the
//! pending batch.

pub mod checksum;
pub mod checksummer;
pub mod error;
pub mod installer;
pub mod pipeline;
pub mod progress;
pub mod resolver;
pub mod transport;
pub mod uploader;

pub use checksummer::{update_all, update_from_local, update_from_remote, RefreshReport};
pub use error::SyncError;
pub use installer::{apply_deferred, InstallReport};
pub use progress::{LogProgress, NullProgress, Progress};
pub use resolver::{resolve, Conflict, Resolution};
pub use transport::{DirRemote, DirSite, Remote, Transport};
pub use uploader::UploadReport;
