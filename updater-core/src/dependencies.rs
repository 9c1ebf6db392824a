//! Dependency closure and consistency checks over a [`Collection`].
//!
//! Both are pure functions of the current action set: computing them never
//! mutates the collection, so the resolver can call them repeatedly until it
//! converges.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use crate::collection::Collection;
use crate::types::{Action, FileName, FileRecord, Status};

/// Files implicated by the current action set that were not explicitly
/// selected, each mapped to the selected files that require it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyMap {
    entries: BTreeMap<FileName, BTreeSet<FileName>>,
}

impl DependencyMap {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, file: &FileName) -> bool {
        self.entries.contains_key(file)
    }

    /// The files that drag `file` into the batch.
    pub fn required_by(&self, file: &FileName) -> Option<&BTreeSet<FileName>> {
        self.entries.get(file)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FileName, &BTreeSet<FileName>)> {
        self.entries.iter()
    }

    pub fn implicated(&self) -> impl Iterator<Item = &FileName> {
        self.entries.keys()
    }

    fn add(&mut self, file: FileName, required_by: FileName) -> bool {
        let fresh = !self.entries.contains_key(&file);
        self.entries.entry(file).or_default().insert(required_by);
        fresh
    }
}

/// Why a planned batch would leave the collection inconsistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueKind {
    /// The dependency is not tracked at all.
    UnknownDependency,
    /// The dependency would be missing locally after the batch.
    NotInstalled,
    /// The dependency would not be listed on any site after the batch.
    NotPublished,
    /// The dependency differs locally from what is published.
    NotUploaded,
    /// The dependency is being removed from its site while this file needs it.
    RemovalConflict,
    /// The record names a site the collection does not know.
    UnknownSite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyIssue {
    pub file: FileName,
    pub dependency: Option<FileName>,
    pub kind: IssueKind,
}

impl fmt::Display for ConsistencyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dep = self
            .dependency
            .as_ref()
            .map(|d| d.as_str())
            .unwrap_or("?");
        match self.kind {
            IssueKind::UnknownDependency => {
                write!(f, "{} depends on {}, which is not known", self.file, dep)
            }
            IssueKind::NotInstalled => write!(
                f,
                "{} depends on {}, which would not be installed",
                self.file, dep
            ),
            IssueKind::NotPublished => write!(
                f,
                "{} depends on {}, which would not be available on any update site",
                self.file, dep
            ),
            IssueKind::NotUploaded => write!(
                f,
                "{} depends on {}, which was modified locally but is not being uploaded",
                self.file, dep
            ),
            IssueKind::RemovalConflict => write!(
                f,
                "{} needs {}, which is marked for removal from its update site",
                self.file, dep
            ),
            IssueKind::UnknownSite => write!(f, "{} belongs to an unknown update site", self.file),
        }
    }
}

impl Collection {
    /// Files the current action set drags in without them being selected.
    ///
    /// With `for_upload` the closure follows UPLOAD actions and asks "would
    /// this dependency be published in its current local version"; otherwise
    /// it follows INSTALL/UPDATE and asks "would this dependency be present
    /// and current on disk".
    pub fn dependencies(&self, for_upload: bool) -> DependencyMap {
        let selected = move |record: &FileRecord| {
            if for_upload {
                record.action() == Action::Upload
            } else {
                record.action().installs()
            }
        };

        let mut map = DependencyMap::default();
        let mut queue: VecDeque<&FileRecord> = self.filter(selected).collect();
        let mut seen: BTreeSet<&FileName> = queue.iter().map(|r| &r.name).collect();

        while let Some(record) = queue.pop_front() {
            for dep in &record.dependencies {
                let Some(dependency) = self.get(dep) else {
                    continue;
                };
                if selected(dependency) || !needs_change(dependency, for_upload) {
                    continue;
                }
                map.add(dep.clone(), record.name.clone());
                if seen.insert(&dependency.name) {
                    queue.push_back(dependency);
                }
            }
        }
        map
    }

    /// All problems the pending batch would cause. Upload rules only apply
    /// when `for_upload` is set; local rules always apply.
    pub fn consistency_issues(&self, for_upload: bool) -> Vec<ConsistencyIssue> {
        let mut issues = Vec::new();

        for record in self.changes() {
            if let Some(site) = &record.site {
                if self.site(site).is_none() {
                    issues.push(ConsistencyIssue {
                        file: record.name.clone(),
                        dependency: None,
                        kind: IssueKind::UnknownSite,
                    });
                }
            }
        }

        for record in self.iter() {
            for dep in &record.dependencies {
                let issue = |kind| ConsistencyIssue {
                    file: record.name.clone(),
                    dependency: Some(dep.clone()),
                    kind,
                };
                let Some(dependency) = self.get(dep) else {
                    if record.action() != Action::None {
                        issues.push(issue(IssueKind::UnknownDependency));
                    }
                    continue;
                };

                if let Some(kind) = local_issue(record, dependency) {
                    issues.push(issue(kind));
                } else if for_upload {
                    if let Some(kind) = upload_issue(record, dependency) {
                        issues.push(issue(kind));
                    }
                }
            }
        }
        issues
    }

    /// Human-readable diagnostic for the pending batch, `None` if it is
    /// consistent.
    pub fn check_consistency(&self) -> Option<String> {
        let issues = self.consistency_issues(self.has_upload_or_remove());
        if issues.is_empty() {
            return None;
        }
        let lines: Vec<String> = issues.iter().map(ToString::to_string).collect();
        Some(lines.join("\n"))
    }
}

fn needs_change(dependency: &FileRecord, for_upload: bool) -> bool {
    if for_upload {
        !dependency.published_after_batch()
            || matches!(
                dependency.status(),
                Status::Modified | Status::New | Status::LocalOnly
            )
    } else {
        !dependency.present_after_batch() || dependency.status() == Status::Updateable
    }
}

fn local_issue(record: &FileRecord, dependency: &FileRecord) -> Option<IssueKind> {
    if record.action().installs() && dependency.action() == Action::Remove {
        return Some(IssueKind::RemovalConflict);
    }
    let touched = record.action().installs() || dependency.action() == Action::Uninstall;
    if touched && record.present_after_batch() && !dependency.present_after_batch() {
        return Some(IssueKind::NotInstalled);
    }
    None
}

fn upload_issue(record: &FileRecord, dependency: &FileRecord) -> Option<IssueKind> {
    let uploading = record.action() == Action::Upload;
    let touched = uploading || dependency.action() == Action::Remove;
    if !touched || !record.published_after_batch() {
        return None;
    }
    if dependency.action() == Action::Remove {
        return Some(IssueKind::RemovalConflict);
    }
    if !dependency.published_after_batch() {
        return Some(IssueKind::NotPublished);
    }
    if uploading
        && dependency.action() != Action::Upload
        && matches!(
            dependency.status(),
            Status::Modified | Status::New | Status::LocalOnly
        )
    {
        return Some(IssueKind::NotUploaded);
    }
    None
}
