//! Draft overlay: uncommitted edits kept on disk beside the clone.
//!
//! Layout mirrors the repository under
//! `<drafts_dir>/<repo_folder>/<branch>/`. An entry exists only while the
//! file diverges from its last known remote blob.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::LayoutConfig;
use crate::models::{ConfigFile, FileType};

/// Draft files of one branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftListing {
    pub files: Vec<ConfigFile>,
    pub applications: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DraftStore {
    root: PathBuf,
    apps_folder: String,
    settings_file: String,
}

impl DraftStore {
    pub fn new(drafts_dir: &Path, repo_folder: &str, layout: &LayoutConfig) -> Self {
        Self {
            root: drafts_dir.join(repo_folder),
            apps_folder: layout.apps_folder.clone(),
            settings_file: layout.settings_file.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    pub fn branch_dir(&self, branch: &str) -> PathBuf {
        self.root.join(branch)
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Draft content at `path`, if any.
    pub fn read(&self, path: &Path) -> io::Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn write(&self, path: &Path, content: &str) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        debug!(path = %path.display(), "wrote draft");
        Ok(())
    }

    /// Remove a draft; returns whether one existed.
    pub fn remove(&self, path: &Path) -> io::Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed draft");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Drop every draft of `branch`.
    pub fn remove_branch(&self, branch: &str) -> io::Result<()> {
        let dir = self.branch_dir(branch);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(branch, "removed branch drafts");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Draft files of `branch` without their content. Draft files are
    /// reported as modified.
    ///
    /// Root and apps-folder level only hold markdown and settings files;
    /// application folders also hold YAML.
    pub fn list(&self, branch: &str) -> io::Result<DraftListing> {
        let mut listing = DraftListing::default();
        let branch_dir = self.branch_dir(branch);

        for (name, size) in self.files_in(&branch_dir)? {
            if let Some(file_type) = self.root_level_type(&name) {
                listing.files.push(draft_file("", name, file_type, size));
            }
        }

        let apps_dir = branch_dir.join(&self.apps_folder);
        for (name, size) in self.files_in(&apps_dir)? {
            if let Some(file_type) = self.root_level_type(&name) {
                listing
                    .files
                    .push(draft_file(&self.apps_folder, name, file_type, size));
            }
        }

        for app in dirs_in(&apps_dir)? {
            for (name, size) in self.files_in(&apps_dir.join(&app))? {
                if let Some(file_type) = FileType::from_file_name(&name, &self.settings_file) {
                    listing.files.push(draft_file(&app, name, file_type, size));
                }
            }
            listing.applications.push(app);
        }

        listing.files.sort_by(|a, b| {
            (&a.application_name, &a.file_name).cmp(&(&b.application_name, &b.file_name))
        });
        listing.applications.sort();
        Ok(listing)
    }

    fn root_level_type(&self, name: &str) -> Option<FileType> {
        match FileType::from_file_name(name, &self.settings_file) {
            Some(FileType::Yaml) | None => None,
            other => other,
        }
    }

    fn files_in(&self, dir: &Path) -> io::Result<Vec<(String, u64)>> {
        let mut files = Vec::new();
        for entry in read_dir_if_exists(dir)? {
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => files.push((name, meta.len())),
                Err(name) => warn!(?name, "skipping draft with non UTF-8 name"),
            }
        }
        Ok(files)
    }
}

fn draft_file(app: &str, name: String, file_type: FileType, size: u64) -> ConfigFile {
    let mut file = ConfigFile::new(app, name, file_type);
    file.size = Some(size);
    file.modified = true;
    file
}

fn dirs_in(dir: &Path) -> io::Result<Vec<String>> {
    let mut dirs = Vec::new();
    for entry in read_dir_if_exists(dir)? {
        if entry.file_type()?.is_dir() {
            if let Ok(name) = entry.file_name().into_string() {
                dirs.push(name);
            }
        }
    }
    Ok(dirs)
}

fn read_dir_if_exists(dir: &Path) -> io::Result<Vec<fs::DirEntry>> {
    match fs::read_dir(dir) {
        Ok(entries) => entries.collect(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::PathResolver;

    fn store(dir: &Path) -> DraftStore {
        DraftStore::new(dir, "alice@conf", &LayoutConfig::default())
    }

    #[test]
    fn test_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let drafts = store(dir.path());
        let path = drafts.branch_dir("master").join("apps/app1/a.yaml");

        assert_eq!(drafts.read(&path).unwrap(), None);
        drafts.write(&path, "k: v\n").unwrap();
        assert!(drafts.exists(&path));
        assert_eq!(drafts.read(&path).unwrap().as_deref(), Some("k: v\n"));
        assert!(drafts.remove(&path).unwrap());
        assert!(!drafts.remove(&path).unwrap());
    }

    #[test]
    fn test_branch_dir_matches_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let drafts = store(dir.path());
        let resolver = PathResolver::new(&LayoutConfig::default(), dir.path().to_path_buf());
        assert_eq!(
            drafts.branch_dir("feature"),
            resolver.draft_branch_dir("alice@conf", "feature")
        );
    }

    #[test]
    fn test_list_filters_by_level() {
        let dir = tempfile::tempdir().unwrap();
        let drafts = store(dir.path());
        let branch = drafts.branch_dir("master");
        for (path, content) in [
            ("README.md", "docs"),
            ("root.yaml", "ignored: true"),
            ("apps/.confrc", "{}"),
            ("apps/notes.md", "notes"),
            ("apps/app1/a.yaml", "a: 1"),
            ("apps/app1/script.sh", "ignored"),
            ("apps/app2/.confrc", "{}"),
        ] {
            drafts.write(&branch.join(path), content).unwrap();
        }

        let listing = drafts.list("master").unwrap();
        let labels: Vec<String> = listing.files.iter().map(|f| f.label()).collect();
        assert_eq!(
            labels,
            vec!["/README.md", "app1/a.yaml", "app2/.confrc", "apps/.confrc", "apps/notes.md"]
        );
        assert_eq!(listing.applications, vec!["app1", "app2"]);
        assert!(listing.files.iter().all(|f| f.modified));
        assert_eq!(listing.files[1].size, Some(4));
    }

    #[test]
    fn test_remove_branch_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let drafts = store(dir.path());
        drafts
            .write(&drafts.branch_dir("gone").join("README.md"), "x")
            .unwrap();
        drafts.remove_branch("gone").unwrap();
        drafts.remove_branch("gone").unwrap();
        assert!(drafts.list("gone").unwrap().files.is_empty());
    }
}
