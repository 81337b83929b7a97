//! Mapping from file descriptors to repository and overlay locations.

use std::path::PathBuf;

use crate::config::LayoutConfig;
use crate::models::ConfigFile;

/// Where a file lives, in the repository and in the draft overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePaths {
    /// Repository-relative path, `/`-separated.
    pub repo_file_path: String,
    /// Repository-relative directory of the file (`""` for root files).
    pub repo_app_dir: String,
    pub draft_app_dir: PathBuf,
    pub draft_file_path: PathBuf,
}

/// Pure function of the layout, the overlay root, and its inputs.
#[derive(Debug, Clone)]
pub struct PathResolver {
    apps_folder: String,
    drafts_root: PathBuf,
}

impl PathResolver {
    /// `drafts_root` is the parent of every repository folder's overlay.
    pub fn new(layout: &LayoutConfig, drafts_root: PathBuf) -> Self {
        Self {
            apps_folder: layout.apps_folder.clone(),
            drafts_root,
        }
    }

    pub fn apps_folder(&self) -> &str {
        &self.apps_folder
    }

    /// Repository-relative directory holding `application_name`'s files.
    pub fn repo_app_dir(&self, application_name: &str) -> String {
        if application_name.is_empty() {
            String::new()
        } else if application_name == self.apps_folder {
            self.apps_folder.clone()
        } else {
            format!("{}/{}", self.apps_folder, application_name)
        }
    }

    /// Repository-relative path of `file`.
    pub fn repo_file_path(&self, file: &ConfigFile) -> String {
        let dir = self.repo_app_dir(&file.application_name);
        if dir.is_empty() {
            file.file_name.clone()
        } else {
            format!("{}/{}", dir, file.file_name)
        }
    }

    /// Root of one branch's overlay.
    pub fn draft_branch_dir(&self, repo_folder: &str, branch: &str) -> PathBuf {
        self.drafts_root.join(repo_folder).join(branch)
    }

    pub fn resolve(&self, repo_folder: &str, branch: &str, file: &ConfigFile) -> FilePaths {
        let repo_app_dir = self.repo_app_dir(&file.application_name);
        let mut draft_app_dir = self.draft_branch_dir(repo_folder, branch);
        for segment in repo_app_dir.split('/').filter(|s| !s.is_empty()) {
            draft_app_dir.push(segment);
        }
        FilePaths {
            repo_file_path: self.repo_file_path(file),
            draft_file_path: draft_app_dir.join(&file.file_name),
            draft_app_dir,
            repo_app_dir,
        }
    }
}

/// Manifest key of a file: `<application>/<file>`.
pub fn file_key(file: &ConfigFile) -> String {
    format!("{}/{}", file.application_name, file.file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileType;

    fn resolver() -> PathResolver {
        PathResolver::new(&LayoutConfig::default(), PathBuf::from("/data/drafts"))
    }

    #[test]
    fn test_root_file() {
        let file = ConfigFile::new("", "README.md", FileType::Markdown);
        let paths = resolver().resolve("alice@conf", "master", &file);
        assert_eq!(paths.repo_file_path, "README.md");
        assert_eq!(paths.repo_app_dir, "");
        assert_eq!(
            paths.draft_file_path,
            PathBuf::from("/data/drafts/alice@conf/master/README.md")
        );
    }

    #[test]
    fn test_apps_folder_file() {
        let file = ConfigFile::new("apps", ".confrc", FileType::Settings);
        let paths = resolver().resolve("alice@conf", "master", &file);
        assert_eq!(paths.repo_file_path, "apps/.confrc");
        assert_eq!(
            paths.draft_app_dir,
            PathBuf::from("/data/drafts/alice@conf/master/apps")
        );
    }

    #[test]
    fn test_application_file() {
        let file = ConfigFile::new("app1", "a.yaml", FileType::Yaml);
        let paths = resolver().resolve("alice@conf", "feature/x", &file);
        assert_eq!(paths.repo_file_path, "apps/app1/a.yaml");
        assert_eq!(paths.repo_app_dir, "apps/app1");
        assert_eq!(
            paths.draft_file_path,
            PathBuf::from("/data/drafts/alice@conf/feature/x/apps/app1/a.yaml")
        );
        assert_eq!(file_key(&file), "app1/a.yaml");
    }

    #[test]
    fn test_resolution_is_reproducible() {
        let file = ConfigFile::new("app1", "a.yaml", FileType::Yaml);
        let r = resolver();
        assert_eq!(r.resolve("f", "b", &file), r.resolve("f", "b", &file));
    }
}
