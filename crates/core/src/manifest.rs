//! File manifests read straight from commit and tree objects.
//!
//! Three levels of the tree are managed:
//! - the root, holding markdown and settings files (application `""`),
//! - the apps folder, holding markdown and settings files (application =
//!   the apps folder name) plus one directory per application,
//! - each application directory, holding YAML, markdown and settings files.
//!
//! Anything deeper, and any other file type, is ignored.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::config::LayoutConfig;
use crate::errors::StoreError;
use crate::git::{EntryKind, ObjectStore};
use crate::models::{ConfigFile, FileType, ObjectId};
use crate::paths::file_key;

/// Files keyed by `<application>/<file>`.
pub type Manifest = BTreeMap<String, ConfigFile>;

/// Files grouped by application. The root (`""`) and apps-folder groups are
/// always present, even when empty.
pub type RepoFiles = BTreeMap<String, Vec<ConfigFile>>;

enum Level {
    Root,
    AppsFolder,
    Application(String),
}

/// Walk the tree of `commit` without reading any blob.
pub fn load_repo_files<S: ObjectStore + ?Sized>(
    store: &S,
    layout: &LayoutConfig,
    commit: &ObjectId,
) -> Result<RepoFiles, StoreError> {
    let mut result = RepoFiles::new();
    result.insert(String::new(), Vec::new());
    result.insert(layout.apps_folder.clone(), Vec::new());

    let root_tree = store.read_object(commit)?.into_commit(commit)?.tree;

    let mut stack = vec![(root_tree, Level::Root)];
    let mut visited: HashSet<(ObjectId, String)> = HashSet::new();

    while let Some((tree_oid, level)) = stack.pop() {
        let group = match level {
            Level::Root => String::new(),
            Level::AppsFolder => layout.apps_folder.clone(),
            Level::Application(ref app) => app.clone(),
        };
        // The same tree may back several applications; each is walked once.
        if !visited.insert((tree_oid.clone(), group.clone())) {
            continue;
        }

        let entries = store.read_object(&tree_oid)?.into_tree(&tree_oid)?;
        for entry in entries {
            match (&level, entry.kind) {
                (Level::Root, EntryKind::Tree) if entry.name == layout.apps_folder => {
                    stack.push((entry.oid, Level::AppsFolder));
                }
                (Level::AppsFolder, EntryKind::Tree) => {
                    result.entry(entry.name.clone()).or_default();
                    stack.push((entry.oid, Level::Application(entry.name)));
                }
                (Level::Root | Level::AppsFolder, EntryKind::Blob) => {
                    match FileType::from_file_name(&entry.name, &layout.settings_file) {
                        Some(file_type @ (FileType::Markdown | FileType::Settings)) => {
                            result
                                .entry(group.clone())
                                .or_default()
                                .push(
                                    ConfigFile::new(group.clone(), entry.name, file_type)
                                        .with_oid(entry.oid),
                                );
                        }
                        _ => {}
                    }
                }
                (Level::Application(app), EntryKind::Blob) => {
                    if let Some(file_type) =
                        FileType::from_file_name(&entry.name, &layout.settings_file)
                    {
                        result
                            .entry(app.clone())
                            .or_default()
                            .push(
                                ConfigFile::new(app.clone(), entry.name, file_type)
                                    .with_oid(entry.oid),
                            );
                    }
                }
                _ => {}
            }
        }
    }

    for files in result.values_mut() {
        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    }
    debug!(
        commit = %commit,
        applications = result.len().saturating_sub(2),
        files = result.values().map(Vec::len).sum::<usize>(),
        "loaded repository files"
    );
    Ok(result)
}

/// Key every file by `<application>/<file>`.
pub fn flatten(files: &RepoFiles) -> Manifest {
    files
        .values()
        .flatten()
        .map(|f| (file_key(f), f.clone()))
        .collect()
}

/// Flat manifest of `commit`.
pub fn load_manifest<S: ObjectStore + ?Sized>(
    store: &S,
    layout: &LayoutConfig,
    commit: &ObjectId,
) -> Result<Manifest, StoreError> {
    Ok(flatten(&load_repo_files(store, layout, commit)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{MemoryRemote, StoreBackend};
    use crate::git::refs::remote_ref;
    use crate::git::Credentials;

    #[test]
    fn test_levels_and_file_types() {
        let remote = MemoryRemote::new();
        remote
            .commit_to_branch(
                "master",
                &[
                    ("README.md", Some("# conf")),
                    ("root.yaml", Some("ignored: true")),
                    (".confrc", Some("{}")),
                    ("apps/.confrc", Some("{}")),
                    ("apps/top.yaml", Some("ignored: true")),
                    ("apps/app1/a.yaml", Some("a: 1")),
                    ("apps/app1/b.yml", Some("b: 1")),
                    ("apps/app1/run.sh", Some("ignored")),
                    ("apps/app1/deep/c.yaml", Some("ignored: true")),
                    ("apps/app2/a.yaml", Some("a: 1")),
                    ("other/x.yaml", Some("ignored: true")),
                ],
                "seed",
            )
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = remote
            .clone_shallow(dir.path(), "memory://x", "master", 1, &Credentials::default())
            .unwrap();
        let tip = store.read_ref(&remote_ref("master")).unwrap();

        let files = load_repo_files(&store, &LayoutConfig::default(), &tip).unwrap();
        let names = |app: &str| -> Vec<String> {
            files[app].iter().map(|f| f.file_name.clone()).collect()
        };
        assert_eq!(names(""), vec![".confrc", "README.md"]);
        assert_eq!(names("apps"), vec![".confrc"]);
        assert_eq!(names("app1"), vec!["a.yaml", "b.yml"]);
        assert_eq!(names("app2"), vec!["a.yaml"]);

        let manifest = flatten(&files);
        assert_eq!(manifest.len(), 6);
        // Identical content in two applications gives the same blob oid.
        assert_eq!(manifest["app1/a.yaml"].oid, manifest["app2/a.yaml"].oid);
        assert_eq!(manifest["apps/.confrc"].file_type, FileType::Settings);
    }

    #[test]
    fn test_empty_groups_are_present() {
        let remote = MemoryRemote::new();
        remote
            .commit_to_branch("master", &[("notes.txt", Some("x"))], "seed")
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = remote
            .clone_shallow(dir.path(), "memory://x", "master", 1, &Credentials::default())
            .unwrap();
        let tip = store.read_ref(&remote_ref("master")).unwrap();

        let files = load_repo_files(&store, &LayoutConfig::default(), &tip).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[""].is_empty());
        assert!(files["apps"].is_empty());
    }

    #[test]
    fn test_identical_app_trees_are_both_listed() {
        let remote = MemoryRemote::new();
        remote
            .commit_to_branch(
                "master",
                &[("apps/one/a.yaml", Some("same")), ("apps/two/a.yaml", Some("same"))],
                "seed",
            )
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = remote
            .clone_shallow(dir.path(), "memory://x", "master", 1, &Credentials::default())
            .unwrap();
        let tip = store.read_ref(&remote_ref("master")).unwrap();

        let manifest = load_manifest(&store, &LayoutConfig::default(), &tip).unwrap();
        assert!(manifest.contains_key("one/a.yaml"));
        assert!(manifest.contains_key("two/a.yaml"));
    }
}
