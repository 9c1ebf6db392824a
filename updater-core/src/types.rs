//! Domain types for tracked files.
//!
//! A [`FileRecord`] carries the local and remote state of one file together
//! with the [`Action`] the user wants applied to it. Which actions a record
//! may carry is decided by its [`Status`]; see [`Status::admits`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Path-like name of a tracked file, relative to the installation root and
/// always `/`-separated (e.g. `plugins/Flip.jar`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileName(pub String);

impl FileName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for FileName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FileName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed update site name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteName(pub String);

impl fmt::Display for SiteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SiteName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SiteName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Status / Action
// ---------------------------------------------------------------------------

/// Derived state of a file, computed from checksum and timestamp comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    NotInstalled,
    Installed,
    Updateable,
    /// Local checksum diverges from the recorded one.
    Modified,
    /// No longer listed upstream but still present locally.
    Obsolete,
    ObsoleteUninstalled,
    /// Assigned to an update site but never published there.
    New,
    LocalOnly,
}

/// The operation a user wants applied to a file in the next batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[default]
    None,
    Install,
    Update,
    Uninstall,
    Upload,
    Remove,
}

impl Status {
    pub const ALL: [Status; 8] = [
        Status::NotInstalled,
        Status::Installed,
        Status::Updateable,
        Status::Modified,
        Status::Obsolete,
        Status::ObsoleteUninstalled,
        Status::New,
        Status::LocalOnly,
    ];

    /// Actions any user may pick for a file in this state.
    pub fn user_actions(self) -> &'static [Action] {
        match self {
            Status::NotInstalled => &[Action::None, Action::Install],
            Status::Installed => &[Action::None, Action::Uninstall],
            Status::Updateable | Status::Modified => {
                &[Action::None, Action::Update, Action::Uninstall]
            }
            Status::Obsolete | Status::New | Status::LocalOnly => {
                &[Action::None, Action::Uninstall]
            }
            Status::ObsoleteUninstalled => &[Action::None],
        }
    }

    /// Actions only available when the file's site accepts uploads.
    pub fn developer_actions(self) -> &'static [Action] {
        match self {
            Status::NotInstalled | Status::Installed | Status::Updateable => &[Action::Remove],
            Status::Modified | Status::Obsolete | Status::New | Status::LocalOnly => {
                &[Action::Upload]
            }
            Status::ObsoleteUninstalled => &[],
        }
    }

    /// Whether `action` may be assigned to a file in this state.
    pub fn admits(self, action: Action, uploadable: bool) -> bool {
        self.user_actions().contains(&action)
            || (uploadable && self.developer_actions().contains(&action))
    }

    pub fn valid_actions(self, uploadable: bool) -> Vec<Action> {
        let mut actions = self.user_actions().to_vec();
        if uploadable {
            actions.extend_from_slice(self.developer_actions());
        }
        actions
    }

    /// States a file settles in once a batch has been applied to it.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Installed | Status::NotInstalled | Status::ObsoleteUninstalled
        )
    }

    /// Whether a file in this state exists in the local installation.
    pub fn is_present_locally(self) -> bool {
        !matches!(self, Status::NotInstalled | Status::ObsoleteUninstalled)
    }

    pub fn key(self) -> &'static str {
        match self {
            Status::NotInstalled => "not_installed",
            Status::Installed => "installed",
            Status::Updateable => "updateable",
            Status::Modified => "modified",
            Status::Obsolete => "obsolete",
            Status::ObsoleteUninstalled => "obsolete_uninstalled",
            Status::New => "new",
            Status::LocalOnly => "local_only",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::NotInstalled => "Not installed",
            Status::Installed => "Up-to-date",
            Status::Updateable => "Update available",
            Status::Modified => "Locally modified",
            Status::Obsolete => "Obsolete",
            Status::ObsoleteUninstalled => "Obsolete (uninstalled)",
            Status::New => "New file",
            Status::LocalOnly => "Local-only",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::None,
        Action::Install,
        Action::Update,
        Action::Uninstall,
        Action::Upload,
        Action::Remove,
    ];

    /// Install or update: the batch puts the remote version on disk.
    pub fn installs(self) -> bool {
        matches!(self, Action::Install | Action::Update)
    }

    /// Handled by the installer.
    pub fn is_local(self) -> bool {
        matches!(self, Action::Install | Action::Update | Action::Uninstall)
    }

    /// Handled by the uploader.
    pub fn is_remote(self) -> bool {
        matches!(self, Action::Upload | Action::Remove)
    }

    pub fn key(self) -> &'static str {
        match self {
            Action::None => "none",
            Action::Install => "install",
            Action::Update => "update",
            Action::Uninstall => "uninstall",
            Action::Upload => "upload",
            Action::Remove => "remove",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Action::None => "Keep as-is",
            Action::Install => "Install",
            Action::Update => "Update",
            Action::Uninstall => "Uninstall",
            Action::Upload => "Upload",
            Action::Remove => "Remove",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ---------------------------------------------------------------------------
// FileRecord
// ---------------------------------------------------------------------------

/// The version of a file published on one update site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteVersion {
    pub checksum: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub filesize: u64,
}

/// One tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: FileName,
    /// Owning update site; `None` for local-only files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<SiteName>,
    /// Checksum recorded when the file was last installed or uploaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub remote: BTreeMap<SiteName, RemoteVersion>,
    #[serde(default)]
    pub filesize: u64,
    #[serde(default)]
    pub executable: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub dependencies: BTreeSet<FileName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    status: Status,
    #[serde(default)]
    action: Action,
}

impl FileRecord {
    pub fn new(name: impl Into<FileName>, status: Status) -> Self {
        Self {
            name: name.into(),
            site: None,
            checksum: None,
            local_checksum: None,
            local_timestamp: None,
            remote: BTreeMap::new(),
            filesize: 0,
            executable: false,
            dependencies: BTreeSet::new(),
            description: None,
            status,
            action: Action::None,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn action(&self) -> Action {
        self.action
    }

    /// Replace the status. An action the new status no longer admits is
    /// dropped back to [`Action::None`].
    pub fn set_status(&mut self, status: Status) {
        self.status = status;
        if !status.admits(self.action, true) {
            self.action = Action::None;
        }
    }

    /// Assign `action` if the current status admits it. Returns `false` and
    /// leaves the record untouched otherwise.
    ///
    /// Prefer [`Collection::set_action`](crate::Collection::set_action), which
    /// derives `uploadable` from the record's update site.
    pub fn set_action(&mut self, action: Action, uploadable: bool) -> bool {
        if !self.status.admits(action, uploadable) {
            return false;
        }
        self.action = action;
        true
    }

    /// Commit the first candidate the current status admits.
    pub fn set_first_valid_action(&mut self, candidates: &[Action], uploadable: bool) -> bool {
        candidates
            .iter()
            .any(|action| self.set_action(*action, uploadable))
    }

    pub fn clear_action(&mut self) {
        self.action = Action::None;
    }

    /// Version published by the record's own site, if any.
    pub fn remote_version(&self) -> Option<&RemoteVersion> {
        self.site.as_ref().and_then(|site| self.remote.get(site))
    }

    /// Whether the file exists locally once the pending action is applied.
    pub fn present_after_batch(&self) -> bool {
        match self.action {
            Action::Install | Action::Update => true,
            Action::Uninstall => false,
            _ => self.status.is_present_locally(),
        }
    }

    /// Whether the file is listed on its site once the pending action is applied.
    pub fn published_after_batch(&self) -> bool {
        match self.action {
            Action::Upload => true,
            Action::Remove => false,
            _ => self.remote_version().is_some(),
        }
    }

    /// Size of the version the installer would download.
    pub fn download_size(&self) -> u64 {
        self.remote_version()
            .map(|v| v.filesize)
            .unwrap_or(self.filesize)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(FileName::from("plugins/a.jar").to_string(), "plugins/a.jar");
        assert_eq!(SiteName::from("main").to_string(), "main");
    }

    #[test]
    fn none_is_admitted_everywhere() {
        for status in Status::ALL {
            assert!(status.admits(Action::None, false), "{status}");
        }
    }

    #[test]
    fn admitted_table_matches_examples() {
        assert_eq!(
            Status::NotInstalled.valid_actions(false),
            vec![Action::None, Action::Install]
        );
        assert_eq!(
            Status::Updateable.valid_actions(false),
            vec![Action::None, Action::Update, Action::Uninstall]
        );
        assert_eq!(
            Status::Obsolete.valid_actions(false),
            vec![Action::None, Action::Uninstall]
        );
    }

    #[test]
    fn developer_actions_require_uploadable_site() {
        assert!(!Status::Modified.admits(Action::Upload, false));
        assert!(Status::Modified.admits(Action::Upload, true));
        assert!(!Status::ObsoleteUninstalled.admits(Action::Remove, true));
    }

    #[test]
    fn every_assignment_stays_inside_the_table() {
        for status in Status::ALL {
            for uploadable in [false, true] {
                for action in Action::ALL {
                    let mut record = FileRecord::new("x", status);
                    let accepted = record.set_action(action, uploadable);
                    assert_eq!(accepted, status.admits(action, uploadable));
                    assert!(status.admits(record.action(), uploadable));
                }
            }
        }
    }

    #[test]
    fn rejected_action_leaves_previous_one() {
        let mut record = FileRecord::new("a.jar", Status::Updateable);
        assert!(record.set_action(Action::Update, false));
        assert!(!record.set_action(Action::Install, false));
        assert_eq!(record.action(), Action::Update);
    }

    #[test]
    fn first_valid_action_picks_in_priority_order() {
        let mut not_installed = FileRecord::new("a.jar", Status::NotInstalled);
        assert!(not_installed.set_first_valid_action(&[Action::Install, Action::Update], false));
        assert_eq!(not_installed.action(), Action::Install);

        let mut updateable = FileRecord::new("b.jar", Status::Updateable);
        assert!(updateable.set_first_valid_action(&[Action::Install, Action::Update], false));
        assert_eq!(updateable.action(), Action::Update);

        let mut gone = FileRecord::new("c.jar", Status::ObsoleteUninstalled);
        assert!(!gone.set_first_valid_action(&[Action::Install, Action::Update], false));
        assert_eq!(gone.action(), Action::None);
    }

    #[test]
    fn status_change_drops_inadmissible_action() {
        let mut record = FileRecord::new("a.jar", Status::NotInstalled);
        assert!(record.set_action(Action::Install, false));
        record.set_status(Status::Installed);
        assert_eq!(record.action(), Action::None);
    }

    #[test]
    fn status_serde_uses_snake_case() {
        let yaml = serde_yaml::to_string(&Status::ObsoleteUninstalled).expect("serialize");
        assert_eq!(yaml.trim(), "obsolete_uninstalled");
    }
}
