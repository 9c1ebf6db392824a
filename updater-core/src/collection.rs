//! The registry of tracked files and known update sites.
//!
//! A [`Collection`] is an owned context object: callers pass it by reference
//! to the checksummer, resolver and executors. Mutating a record's action
//! always goes through [`Collection::set_action`] (or one of its siblings) so
//! the status/action table is enforced with the right upload permissions.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::ManifestError;
use crate::paths;
use crate::site::UpdateSite;
use crate::types::{Action, FileName, FileRecord, SiteName, Status};

#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    root: PathBuf,
    files: BTreeMap<FileName, FileRecord>,
    sites: BTreeMap<SiteName, UpdateSite>,
}

impl Collection {
    /// An empty collection for the installation rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: BTreeMap::new(),
            sites: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// On-disk location of a tracked file, `None` for a name that would
    /// resolve outside the root.
    pub fn local_path(&self, name: &FileName) -> Option<PathBuf> {
        paths::local_path(&self.root, name)
    }

    // -- records ------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, name: &FileName) -> Option<&FileRecord> {
        self.files.get(name)
    }

    /// Mutable access to a record's metadata. Use [`Collection::set_action`]
    /// to change the action.
    pub fn get_mut(&mut self, name: &FileName) -> Option<&mut FileRecord> {
        self.files.get_mut(name)
    }

    pub fn contains(&self, name: &FileName) -> bool {
        self.files.contains_key(name)
    }

    pub fn insert(&mut self, record: FileRecord) -> Option<FileRecord> {
        self.files.insert(record.name.clone(), record)
    }

    pub fn remove(&mut self, name: &FileName) -> Option<FileRecord> {
        self.files.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    pub fn names(&self) -> Vec<FileName> {
        self.files.keys().cloned().collect()
    }

    /// Lazy view over the records matching `predicate`. Nothing is copied.
    pub fn filter<'a, P>(&'a self, mut predicate: P) -> impl Iterator<Item = &'a FileRecord> + 'a
    where
        P: FnMut(&FileRecord) -> bool + 'a,
    {
        self.files.values().filter(move |record| predicate(record))
    }

    pub fn to_install(&self) -> impl Iterator<Item = &FileRecord> {
        self.filter(|record| record.action().installs())
    }

    pub fn to_uninstall(&self) -> impl Iterator<Item = &FileRecord> {
        self.filter(|record| record.action() == Action::Uninstall)
    }

    /// Records the uploader for `site` acts on. Site-less files marked for
    /// upload are published to whichever site is being uploaded.
    pub fn to_upload_or_remove<'a>(
        &'a self,
        site: &'a SiteName,
    ) -> impl Iterator<Item = &'a FileRecord> + 'a {
        self.filter(move |record| match record.action() {
            Action::Upload => record.site.as_ref().map_or(true, |s| s == site),
            Action::Remove => record.site.as_ref() == Some(site),
            _ => false,
        })
    }

    /// Records carrying any action.
    pub fn changes(&self) -> impl Iterator<Item = &FileRecord> {
        self.filter(|record| record.action() != Action::None)
    }

    pub fn has_changes(&self) -> bool {
        self.changes().next().is_some()
    }

    /// A new, independent collection holding copies of `view` and all known
    /// update sites. Used for minimal batches such as a self-update.
    pub fn clone_subset<'a>(&self, view: impl IntoIterator<Item = &'a FileRecord>) -> Collection {
        let mut subset = Collection::new(self.root.clone());
        subset.sites = self.sites.clone();
        for record in view {
            subset.insert(record.clone());
        }
        subset
    }

    // -- sites --------------------------------------------------------------

    pub fn sites(&self) -> impl Iterator<Item = &UpdateSite> {
        self.sites.values()
    }

    pub fn site(&self, name: &SiteName) -> Option<&UpdateSite> {
        self.sites.get(name)
    }

    pub fn site_mut(&mut self, name: &SiteName) -> Option<&mut UpdateSite> {
        self.sites.get_mut(name)
    }

    pub fn add_site(&mut self, site: UpdateSite) -> Option<UpdateSite> {
        self.sites.insert(site.name.clone(), site)
    }

    pub fn has_uploadable_sites(&self) -> bool {
        self.sites.values().any(UpdateSite::is_uploadable)
    }

    pub fn has_upload_or_remove(&self) -> bool {
        self.iter().any(|record| record.action().is_remote())
    }

    /// Sites a pending upload could target.
    pub fn site_names_to_upload(&self) -> BTreeSet<SiteName> {
        let mut names = BTreeSet::new();
        let mut siteless = false;
        for record in self.filter(|r| r.action().is_remote()) {
            match &record.site {
                Some(site) => {
                    names.insert(site.clone());
                }
                None => siteless = true,
            }
        }
        if siteless || names.is_empty() {
            names.extend(
                self.sites
                    .values()
                    .filter(|site| site.is_uploadable())
                    .map(|site| site.name.clone()),
            );
        }
        names.retain(|name| self.site(name).is_some_and(UpdateSite::is_uploadable));
        names
    }

    /// Whether developer actions apply to `record`.
    pub fn is_uploadable(&self, record: &FileRecord) -> bool {
        match &record.site {
            Some(site) => self.site(site).is_some_and(UpdateSite::is_uploadable),
            None => self.has_uploadable_sites(),
        }
    }

    // -- actions ------------------------------------------------------------

    /// Assign `action` to `name` if its status admits it. Unknown files and
    /// inadmissible actions return `false` without touching anything.
    pub fn set_action(&mut self, name: &FileName, action: Action) -> bool {
        self.set_first_valid_action(name, &[action])
    }

    /// Commit the first of `candidates` that `name`'s status admits.
    pub fn set_first_valid_action(&mut self, name: &FileName, candidates: &[Action]) -> bool {
        let Some(record) = self.files.get(name) else {
            return false;
        };
        let uploadable = self.is_uploadable(record);
        match self.files.get_mut(name) {
            Some(record) => record.set_first_valid_action(candidates, uploadable),
            None => false,
        }
    }

    pub fn clear_action(&mut self, name: &FileName) -> bool {
        match self.files.get_mut(name) {
            Some(record) => {
                record.clear_action();
                true
            }
            None => false,
        }
    }

    pub fn valid_actions(&self, name: &FileName) -> Vec<Action> {
        self.get(name)
            .map(|record| record.status().valid_actions(self.is_uploadable(record)))
            .unwrap_or_default()
    }

    /// Assign a local-only file to `site` so it can be uploaded there.
    pub fn add_to_site(&mut self, name: &FileName, site: &SiteName) -> Result<(), ManifestError> {
        if self.site(site).is_none() {
            return Err(ManifestError::UnknownSite(site.clone()));
        }
        let record = self
            .files
            .get_mut(name)
            .ok_or_else(|| ManifestError::UnknownFile(name.clone()))?;
        if record.status() != Status::LocalOnly {
            return Err(ManifestError::NotLocalOnly {
                file: name.clone(),
                status: record.status(),
            });
        }
        record.site = Some(site.clone());
        record.set_status(Status::New);
        Ok(())
    }

    /// Drop actions the current status does not admit (e.g. after loading a
    /// hand-edited manifest). Returns the names that were repaired.
    pub fn repair_actions(&mut self) -> Vec<FileName> {
        let uploadable: Vec<(FileName, bool)> = self
            .iter()
            .map(|record| (record.name.clone(), self.is_uploadable(record)))
            .collect();
        let mut repaired = Vec::new();
        for (name, uploadable) in uploadable {
            if let Some(record) = self.files.get_mut(&name) {
                if !record.status().admits(record.action(), uploadable) {
                    record.clear_action();
                    repaired.push(name);
                }
            }
        }
        repaired
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a FileRecord;
    type IntoIter = std::collections::btree_map::Values<'a, FileName, FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::UploadConfig;

    fn collection() -> Collection {
        let mut files = Collection::new("/opt/app");
        files.add_site(UpdateSite::new("main", "file:///srv/main"));
        let mut a = FileRecord::new("plugins/a.jar", Status::NotInstalled);
        a.site = Some(SiteName::from("main"));
        files.insert(a);
        files.insert(FileRecord::new("plugins/local.jar", Status::LocalOnly));
        files
    }

    #[test]
    fn set_action_rejects_inadmissible_pair() {
        let mut files = collection();
        let a = FileName::from("plugins/a.jar");
        assert!(!files.set_action(&a, Action::Uninstall));
        assert_eq!(files.get(&a).unwrap().action(), Action::None);
        assert!(files.set_action(&a, Action::Install));
        assert!(files.has_changes());
    }

    #[test]
    fn unknown_file_reports_failure() {
        let mut files = collection();
        assert!(!files.set_action(&FileName::from("nope"), Action::Install));
        assert!(!files.clear_action(&FileName::from("nope")));
    }

    #[test]
    fn upload_needs_an_uploadable_site() {
        let mut files = collection();
        let local = FileName::from("plugins/local.jar");
        assert!(!files.set_action(&local, Action::Upload));

        let site = UpdateSite::new("dev", "file:///srv/dev").with_upload(UploadConfig::default());
        files.add_site(site);
        assert!(files.set_action(&local, Action::Upload));
        assert_eq!(
            files.site_names_to_upload(),
            [SiteName::from("dev")].into_iter().collect()
        );
    }

    #[test]
    fn filter_is_a_view_and_clone_subset_is_independent() {
        let mut files = collection();
        let a = FileName::from("plugins/a.jar");
        files.set_action(&a, Action::Install);

        let mut subset = files.clone_subset(files.to_install());
        assert_eq!(subset.len(), 1);
        assert!(subset.site(&SiteName::from("main")).is_some());

        subset.clear_action(&a);
        assert_eq!(files.get(&a).unwrap().action(), Action::Install);
    }

    #[test]
    fn add_to_site_turns_local_only_into_new() {
        let mut files = collection();
        let local = FileName::from("plugins/local.jar");
        files
            .add_to_site(&local, &SiteName::from("main"))
            .expect("add to site");
        let record = files.get(&local).unwrap();
        assert_eq!(record.status(), Status::New);
        assert_eq!(record.site, Some(SiteName::from("main")));

        let err = files
            .add_to_site(&FileName::from("plugins/a.jar"), &SiteName::from("main"))
            .unwrap_err();
        assert!(matches!(err, ManifestError::NotLocalOnly { .. }));
    }

    #[test]
    fn repair_drops_developer_actions_without_upload_rights() {
        let mut files = collection();
        let mut modified = FileRecord::new("plugins/m.jar", Status::Modified);
        assert!(modified.set_action(Action::Upload, true));
        modified.site = Some(SiteName::from("main"));
        files.insert(modified);

        let repaired = files.repair_actions();
        assert_eq!(repaired, vec![FileName::from("plugins/m.jar")]);
        assert!(!files.has_changes());
    }
}
