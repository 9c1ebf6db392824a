//! Local and remote refresh: status derivation against a real filesystem.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use filetime::{set_file_mtime, FileTime};
use tempfile::TempDir;
use updater_core::{
    paths, Collection, FileName, RemoteEntry, SiteIndex, SiteName, Status, UpdateSite,
};
use updater_sync::{
    checksum::{self, hash_bytes},
    checksummer::{self, read_only_files},
    transport::{DirRemote, DirSite, Transport},
};

fn setup() -> (TempDir, PathBuf, PathBuf) {
    let _ = env_logger::builder().is_test(true).try_init();
    let tmp = TempDir::new().expect("tempdir");
    let root = tmp.path().join("app");
    let site = tmp.path().join("site");
    fs::create_dir_all(&root).expect("mkdir");
    fs::create_dir_all(&site).expect("mkdir");
    (tmp, root, site)
}

fn publish(site_dir: &PathBuf, files: &[(&str, &[u8])], published: SystemTime) {
    let mut site = DirSite::new(SiteName::from("main"), site_dir.clone());
    let mut index = SiteIndex {
        timestamp: Utc::now(),
        ..Default::default()
    };
    for (name, contents) in files {
        let source = site_dir.join("source.tmp");
        fs::write(&source, contents).unwrap();
        let entry = RemoteEntry {
            checksum: hash_bytes(contents),
            timestamp: published.into(),
            filesize: contents.len() as u64,
            executable: false,
            dependencies: Default::default(),
            description: Some(format!("{name} description")),
        };
        site.upload(&FileName::from(*name), &source, &entry).unwrap();
        index.files.insert(FileName::from(*name), entry);
    }
    site.publish_index(&index).unwrap();
}

fn collection(root: &PathBuf, site_dir: &PathBuf) -> Collection {
    let mut files = Collection::new(root);
    files.add_site(UpdateSite::new("main", site_dir.display().to_string()));
    files
}

fn status(files: &Collection, name: &str) -> Status {
    files.get(&FileName::from(name)).expect(name).status()
}

#[test]
fn local_refresh_is_idempotent() {
    let (_tmp, root, site) = setup();
    publish(&site, &[("a.jar", b"a"), ("b.jar", b"b")], SystemTime::now());
    fs::write(root.join("a.jar"), b"a").unwrap();
    fs::write(root.join("extra.txt"), b"mine").unwrap();

    let mut files = collection(&root, &site);
    checksummer::update_all(&mut files, &DirRemote).expect("refresh");
    let first: Vec<_> = files.iter().map(|r| (r.name.clone(), r.status())).collect();
    checksummer::update_from_local(&mut files, None).expect("again");
    let second: Vec<_> = files.iter().map(|r| (r.name.clone(), r.status())).collect();

    assert_eq!(first, second);
    assert_eq!(status(&files, "a.jar"), Status::Installed);
    assert_eq!(status(&files, "b.jar"), Status::NotInstalled);
    assert_eq!(status(&files, "extra.txt"), Status::LocalOnly);
}

#[test]
fn state_directory_is_never_discovered() {
    let (_tmp, root, site) = setup();
    publish(&site, &[], SystemTime::now());
    let mut files = collection(&root, &site);
    checksummer::update_all(&mut files, &DirRemote).expect("refresh");
    checksummer::update_all(&mut files, &DirRemote).expect("refresh with cache present");

    assert!(paths::checksum_cache_path(&root).exists());
    assert!(files.is_empty(), "{:?}", files.names());
}

#[test]
fn edited_file_after_publication_is_modified() {
    let (_tmp, root, site) = setup();
    let published = SystemTime::now() - Duration::from_secs(3600);
    publish(&site, &[("a.jar", b"v1")], published);
    let path = root.join("a.jar");
    fs::write(&path, b"local edit").unwrap();

    let mut files = collection(&root, &site);
    checksummer::update_all(&mut files, &DirRemote).expect("refresh");
    assert_eq!(status(&files, "a.jar"), Status::Modified);

    set_file_mtime(&path, FileTime::from_system_time(published - Duration::from_secs(60)))
        .unwrap();
    checksummer::update_from_local(&mut files, None).expect("refresh");
    assert_eq!(status(&files, "a.jar"), Status::Updateable);
}

#[test]
fn cached_checksum_is_reused_for_unchanged_file() {
    let (_tmp, root, site) = setup();
    publish(&site, &[], SystemTime::now());
    let path = root.join("a.jar");
    fs::write(&path, b"content").unwrap();
    let mut files = collection(&root, &site);
    checksummer::update_from_local(&mut files, None).expect("refresh");

    let name = FileName::from("a.jar");
    let mut cache = checksum::load_cache_at(&root).unwrap();
    let entry = cache.files.get(&name).cloned().expect("cached");
    assert_eq!(entry.checksum, hash_bytes(b"content"));
    cache.store(name.clone(), entry.size, entry.modified, "cached-sum".to_string());
    checksum::save_cache_at(&root, &cache).unwrap();

    checksummer::update_from_local(&mut files, Some(std::slice::from_ref(&name))).expect("refresh");
    assert_eq!(
        files.get(&name).unwrap().local_checksum.as_deref(),
        Some("cached-sum")
    );

    set_file_mtime(&path, FileTime::from_unix_time(1_000_000, 0)).unwrap();
    checksummer::update_from_local(&mut files, Some(std::slice::from_ref(&name))).expect("refresh");
    assert_eq!(
        files.get(&name).unwrap().local_checksum.as_deref(),
        Some(hash_bytes(b"content").as_str())
    );
}

#[test]
fn unreachable_site_keeps_previous_remote_data() {
    let (_tmp, root, site) = setup();
    publish(&site, &[("a.jar", b"a")], SystemTime::now());
    let mut files = collection(&root, &site);
    checksummer::update_all(&mut files, &DirRemote).expect("refresh");

    fs::remove_file(site.join("index.yaml")).unwrap();
    let report = checksummer::update_all(&mut files, &DirRemote).expect("refresh");

    assert_eq!(report.unreachable.len(), 1);
    assert_eq!(status(&files, "a.jar"), Status::NotInstalled);
    assert_eq!(
        files.get(&FileName::from("a.jar")).unwrap().description.as_deref(),
        Some("a.jar description")
    );
}

#[test]
fn delisted_uninstalled_file_becomes_obsolete_uninstalled() {
    let (_tmp, root, site) = setup();
    publish(&site, &[("a.jar", b"a"), ("b.jar", b"b")], SystemTime::now());
    let mut files = collection(&root, &site);
    checksummer::update_all(&mut files, &DirRemote).expect("refresh");

    publish(&site, &[("a.jar", b"a")], SystemTime::now());
    checksummer::update_all(&mut files, &DirRemote).expect("refresh");
    assert_eq!(status(&files, "b.jar"), Status::ObsoleteUninstalled);
}

#[cfg(unix)]
#[test]
fn read_only_files_are_listed() {
    use std::os::unix::fs::PermissionsExt;

    let (_tmp, root, site) = setup();
    publish(&site, &[("a.jar", b"a"), ("b.jar", b"b")], SystemTime::now());
    fs::write(root.join("a.jar"), b"a").unwrap();
    fs::write(root.join("b.jar"), b"b").unwrap();
    fs::set_permissions(root.join("b.jar"), fs::Permissions::from_mode(0o444)).unwrap();

    let mut files = collection(&root, &site);
    checksummer::update_all(&mut files, &DirRemote).expect("refresh");
    assert_eq!(read_only_files(&files), vec![FileName::from("b.jar")]);
}
