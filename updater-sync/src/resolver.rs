//! Dependency resolution: add the actions a batch needs to be consistent.
//!
//! The resolver repeatedly asks the collection which files the current
//! action set implicates and assigns each one the first admitted candidate
//! action, until nothing new is implicated. Any file it cannot handle is a
//! [`Conflict`]; in that case every action the resolver added is rolled back
//! so the caller sees the collection exactly as it was.

use std::fmt;

use updater_core::{Action, Collection, FileName};

/// Upper bound on resolution rounds.
pub const MAX_RESOLVE_ITERATIONS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub file: FileName,
    pub message: String,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The batch is consistent. `added` lists the files whose action the
    /// resolver set.
    Resolved { added: Vec<FileName> },
    Conflicts(Vec<Conflict>),
}

impl Resolution {
    pub fn resolved(&self) -> bool {
        matches!(self, Resolution::Resolved { .. })
    }

    /// One conflict per line, or `None` when resolved.
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            Resolution::Resolved { .. } => None,
            Resolution::Conflicts(conflicts) => Some(
                conflicts
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
        }
    }
}

/// Close the pending batch over its dependencies.
///
/// `for_upload` selects upload semantics (implicated files get UPLOAD)
/// instead of local semantics (INSTALL, else UPDATE).
pub fn resolve(files: &mut Collection, for_upload: bool) -> Resolution {
    let candidates: &[Action] = if for_upload {
        &[Action::Upload]
    } else {
        &[Action::Install, Action::Update]
    };

    let mut added: Vec<FileName> = Vec::new();
    let mut conflicts: Vec<Conflict> = Vec::new();
    let mut converged = false;

    for round in 0..MAX_RESOLVE_ITERATIONS {
        let implicated = files.dependencies(for_upload);
        if implicated.is_empty() {
            converged = true;
            break;
        }
        tracing::debug!("resolve round {round}: {} implicated", implicated.len());

        for (name, required_by) in implicated.iter() {
            let required_by = required_by
                .iter()
                .map(FileName::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            let conflict = |message: String| Conflict {
                file: name.clone(),
                message,
            };

            if added.contains(name) {
                conflicts.push(conflict(format!(
                    "{name} (needed by {required_by}) keeps being implicated"
                )));
                continue;
            }
            let current = files.get(name).map(|r| r.action()).unwrap_or_default();
            if current != Action::None {
                conflicts.push(conflict(format!(
                    "{name} is needed by {required_by} but is marked to {current}"
                )));
                continue;
            }
            if files.set_first_valid_action(name, candidates) {
                added.push(name.clone());
            } else {
                let status = files.get(name).map(|r| r.status()).unwrap_or_default();
                conflicts.push(conflict(format!(
                    "{name} is needed by {required_by} but cannot be changed ({status})"
                )));
            }
        }

        if !conflicts.is_empty() {
            break;
        }
    }

    if !converged && conflicts.is_empty() {
        conflicts.push(Conflict {
            file: FileName::from(""),
            message: format!(
                "dependencies did not settle after {MAX_RESOLVE_ITERATIONS} rounds"
            ),
        });
    }

    if conflicts.is_empty() {
        conflicts.extend(
            files
                .consistency_issues(for_upload)
                .into_iter()
                .map(|issue| Conflict {
                    file: issue.file.clone(),
                    message: issue.to_string(),
                }),
        );
    }

    if conflicts.is_empty() {
        return Resolution::Resolved { added };
    }

    for name in &added {
        files.clear_action(name);
    }
    tracing::warn!("resolution failed with {} conflict(s)", conflicts.len());
    Resolution::Conflicts(conflicts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use updater_core::{
        FileRecord, RemoteVersion, SiteName, Status, UpdateSite, UploadConfig,
    };

    fn record(name: &str, status: Status, deps: &[&str]) -> FileRecord {
        let mut record = FileRecord::new(name, status);
        record.site = Some(SiteName::from("main"));
        if !matches!(status, Status::New | Status::LocalOnly | Status::ObsoleteUninstalled) {
            record.remote.insert(
                SiteName::from("main"),
                RemoteVersion {
                    checksum: format!("{name}-remote"),
                    timestamp: Utc::now(),
                    filesize: 1,
                },
            );
        }
        record.dependencies = deps.iter().map(|d| FileName::from(*d)).collect();
        record
    }

    fn files(records: Vec<FileRecord>) -> Collection {
        let mut files = Collection::new("/opt/app");
        files.add_site(
            UpdateSite::new("main", "file:///srv/main").with_upload(UploadConfig::default()),
        );
        for r in records {
            files.insert(r);
        }
        files
    }

    fn action(files: &Collection, name: &str) -> Action {
        files.get(&FileName::from(name)).unwrap().action()
    }

    #[test]
    fn install_pulls_in_missing_and_outdated_dependencies() {
        let mut files = files(vec![
            record("plugin", Status::NotInstalled, &["lib", "base"]),
            record("lib", Status::NotInstalled, &[]),
            record("base", Status::Updateable, &[]),
        ]);
        files.set_action(&FileName::from("plugin"), Action::Install);

        let resolution = resolve(&mut files, false);
        assert!(resolution.resolved(), "{:?}", resolution.diagnostic());
        assert_eq!(action(&files, "lib"), Action::Install);
        assert_eq!(action(&files, "base"), Action::Update);
        assert_eq!(files.check_consistency(), None);
    }

    #[test]
    fn upload_pulls_in_modified_dependency() {
        let mut files = files(vec![
            record("plugin", Status::Modified, &["lib"]),
            record("lib", Status::Modified, &[]),
        ]);
        files.set_action(&FileName::from("plugin"), Action::Upload);

        assert!(resolve(&mut files, true).resolved());
        assert_eq!(action(&files, "lib"), Action::Upload);
    }

    #[test]
    fn conflict_rolls_back_added_actions() {
        let mut files = files(vec![
            record("plugin", Status::NotInstalled, &["lib", "gone"]),
            record("lib", Status::NotInstalled, &[]),
            record("gone", Status::ObsoleteUninstalled, &[]),
        ]);
        files.set_action(&FileName::from("plugin"), Action::Install);

        let resolution = resolve(&mut files, false);
        assert!(!resolution.resolved());
        let diagnostic = resolution.diagnostic().unwrap();
        assert!(diagnostic.contains("gone"), "{diagnostic}");
        assert_eq!(action(&files, "lib"), Action::None, "added action rolled back");
        assert_eq!(action(&files, "plugin"), Action::Install, "user action kept");
    }

    #[test]
    fn contrary_action_is_a_conflict() {
        let mut files = files(vec![
            record("plugin", Status::NotInstalled, &["lib"]),
            record("lib", Status::Installed, &[]),
        ]);
        files.set_action(&FileName::from("lib"), Action::Uninstall);
        files.set_action(&FileName::from("plugin"), Action::Install);

        let resolution = resolve(&mut files, false);
        assert!(!resolution.resolved());
        assert_eq!(action(&files, "lib"), Action::Uninstall);
    }

    #[test]
    fn remote_removal_of_a_needed_dependency_is_reported() {
        let mut files = files(vec![
            record("plugin", Status::Updateable, &["lib"]),
            record("lib", Status::Installed, &[]),
        ]);
        files.set_action(&FileName::from("lib"), Action::Remove);
        files.set_action(&FileName::from("plugin"), Action::Update);

        let resolution = resolve(&mut files, false);
        assert!(resolution.diagnostic().unwrap().contains("removal"));
    }

    #[test]
    fn dependency_cycle_terminates() {
        let mut files = files(vec![
            record("a", Status::NotInstalled, &["b"]),
            record("b", Status::NotInstalled, &["c"]),
            record("c", Status::NotInstalled, &["a"]),
        ]);
        files.set_action(&FileName::from("a"), Action::Install);

        assert!(resolve(&mut files, false).resolved());
        assert_eq!(action(&files, "b"), Action::Install);
        assert_eq!(action(&files, "c"), Action::Install);
    }
}
