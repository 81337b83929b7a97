//! Persistence of [`RepoMetadata`] as one JSON file per repository folder.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::METADATA_VERSION;
use crate::errors::EngineError;
use crate::models::RepoMetadata;

#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    /// Store for `<metadata_dir>/<repo_folder>.json`.
    pub fn new(metadata_dir: &Path, repo_folder: &str) -> Self {
        Self {
            path: metadata_dir.join(format!("{repo_folder}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the metadata; `None` when it is missing, unreadable, or written
    /// by another schema version. Any of those means the clone must be
    /// rebuilt.
    pub fn load(&self) -> Option<RepoMetadata> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "repository metadata missing");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "repository metadata unreadable");
                return None;
            }
        };
        match serde_json::from_str::<RepoMetadata>(&raw) {
            Ok(meta) if meta.version == METADATA_VERSION => Some(meta),
            Ok(meta) => {
                warn!(
                    path = %self.path.display(),
                    found = %meta.version,
                    expected = METADATA_VERSION,
                    "repository metadata has another version"
                );
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "repository metadata is broken");
                None
            }
        }
    }

    pub fn save(&self, metadata: &RepoMetadata) -> Result<(), EngineError> {
        let metadata_error = |detail: String| EngineError::Metadata {
            path: self.path.display().to_string(),
            detail,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| metadata_error(e.to_string()))?;
        }
        let json =
            serde_json::to_string_pretty(metadata).map_err(|e| metadata_error(e.to_string()))?;
        fs::write(&self.path, json).map_err(|e| metadata_error(e.to_string()))?;
        debug!(
            path = %self.path.display(),
            branch = %metadata.branch_name,
            "saved repository metadata"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample() -> RepoMetadata {
        RepoMetadata {
            username: "alice".into(),
            repository_url: "memory://acme/conf".into(),
            repo_name: "acme/conf".into(),
            repo_folder: "alice@acme-conf".into(),
            branch_name: "master".into(),
            commit_base_sha: BTreeMap::new(),
            version: METADATA_VERSION.into(),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path(), "alice@acme-conf");
        assert!(store.load().is_none());

        store.save(&sample()).unwrap();
        assert_eq!(store.load(), Some(sample()));
        assert!(store.path().ends_with("alice@acme-conf.json"));
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path(), "alice@acme-conf");
        let mut meta = sample();
        meta.version = "0".into();
        store.save(&meta).unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_broken_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path(), "alice@acme-conf");
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(store.load().is_none());
    }
}
