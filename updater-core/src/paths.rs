use std::path::{Component, Path, PathBuf};

use crate::types::FileName;

pub const STATE_DIR: &str = ".updater";
pub const MANIFEST_FILE: &str = "db.yaml";
pub const CHECKSUM_CACHE_FILE: &str = "checksums.json";
pub const DEFERRED_FILE: &str = "deferred.yaml";
pub const STAGING_DIR: &str = "staging";

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

pub fn manifest_path(root: &Path) -> PathBuf {
    state_dir(root).join(MANIFEST_FILE)
}

pub fn checksum_cache_path(root: &Path) -> PathBuf {
    state_dir(root).join(CHECKSUM_CACHE_FILE)
}

pub fn deferred_path(root: &Path) -> PathBuf {
    state_dir(root).join(DEFERRED_FILE)
}

pub fn staging_dir(root: &Path) -> PathBuf {
    state_dir(root).join(STAGING_DIR)
}

/// Whether `name` stays inside the installation root: `/`-separated normal
/// components only, and not under the state directory.
pub fn is_valid_name(name: &FileName) -> bool {
    let mut parts = name.0.split('/').peekable();
    if parts.peek().map_or(true, |first| *first == STATE_DIR) {
        return false;
    }
    parts.all(|part| {
        let mut components = Path::new(part).components();
        matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(c)), None) if c == part
        )
    })
}

/// On-disk location of `name` under `root`, `None` if the name could
/// escape it.
pub fn local_path(root: &Path, name: &FileName) -> Option<PathBuf> {
    if !is_valid_name(name) {
        return None;
    }
    Some(name.0.split('/').fold(root.to_path_buf(), |path, part| path.join(part)))
}

/// Inverse of [`local_path`]. Returns `None` for paths outside `root` or
/// inside the state directory.
pub fn file_name_for(root: &Path, path: &Path) -> Option<FileName> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            _ => return None,
        }
    }
    if parts.is_empty() || parts[0] == STATE_DIR {
        return None;
    }
    Some(FileName::from(parts.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_path_and_back() {
        let root = Path::new("/opt/app");
        let name = FileName::from("plugins/sub/a.jar");
        let path = local_path(root, &name).unwrap();
        assert_eq!(path, Path::new("/opt/app/plugins/sub/a.jar"));
        assert_eq!(file_name_for(root, &path), Some(name));
    }

    #[test]
    fn state_dir_is_not_a_tracked_file() {
        let root = Path::new("/opt/app");
        assert_eq!(file_name_for(root, &manifest_path(root)), None);
        assert_eq!(file_name_for(Path::new("/elsewhere"), Path::new("/opt/app/a")), None);
    }

    #[test]
    fn names_that_leave_the_root_are_refused() {
        let root = Path::new("/opt/app");
        for bad in [
            "../escape.jar",
            "plugins/../../escape.jar",
            "/etc/passwd",
            "./a.jar",
            "plugins//a.jar",
            "",
            ".updater/db.yaml",
            "plugins/..",
        ] {
            let name = FileName::from(bad);
            assert!(!is_valid_name(&name), "{bad} accepted");
            assert_eq!(local_path(root, &name), None, "{bad} mapped");
        }
        assert!(is_valid_name(&FileName::from("plugins/.hidden/a.jar")));
    }
}
