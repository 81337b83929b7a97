//! Domain model types used throughout confdraft.
//!
//! These types bridge the object store, the diff engine, the workflow
//! operations and the persisted repository metadata.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Object ids
// ---------------------------------------------------------------------------

/// Hex-encoded content hash of a commit, tree or blob.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First seven characters, for display.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(7);
        &self.0[..end]
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Config files
// ---------------------------------------------------------------------------

/// Kind of a managed file, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Yaml,
    Markdown,
    /// The per-folder settings file (JSON).
    Settings,
}

impl FileType {
    /// Classify a file name; `None` for files the engine does not manage.
    pub fn from_file_name(file_name: &str, settings_file: &str) -> Option<Self> {
        if file_name == settings_file {
            return Some(Self::Settings);
        }
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())?;
        match ext.as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "md" => Some(Self::Markdown),
            _ => None,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yaml => write!(f, "yaml"),
            Self::Markdown => write!(f, "markdown"),
            Self::Settings => write!(f, "settings"),
        }
    }
}

/// Descriptor of one managed file.
///
/// `oid` is the last known remote blob id; `None` means the file does not
/// exist upstream yet. `modified` is always recomputed by the engine and is
/// never trusted as input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub application_name: String,
    pub file_name: String,
    pub file_type: FileType,
    #[serde(default)]
    pub oid: Option<ObjectId>,
    #[serde(default)]
    pub draft_content: Option<String>,
    #[serde(default)]
    pub original_content: Option<String>,
    #[serde(default)]
    pub modified: bool,
    #[serde(default)]
    pub size: Option<u64>,
}

impl ConfigFile {
    pub fn new(
        application_name: impl Into<String>,
        file_name: impl Into<String>,
        file_type: FileType,
    ) -> Self {
        Self {
            application_name: application_name.into(),
            file_name: file_name.into(),
            file_type,
            oid: None,
            draft_content: None,
            original_content: None,
            modified: false,
            size: None,
        }
    }

    pub fn with_oid(mut self, oid: ObjectId) -> Self {
        self.oid = Some(oid);
        self
    }

    pub fn with_draft(mut self, content: impl Into<String>) -> Self {
        self.draft_content = Some(content.into());
        self
    }

    /// `<application>/<file>` label used in messages.
    pub fn label(&self) -> String {
        format!("{}/{}", self.application_name, self.file_name)
    }
}

/// How the caller wants a conflict settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveStrategy {
    /// Keep the draft (source side).
    KeepLocal,
    /// Take the remote (target side).
    KeepRemote,
}

impl fmt::Display for ResolveStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepLocal => write!(f, "keep_local"),
            Self::KeepRemote => write!(f, "keep_remote"),
        }
    }
}

/// A file that diverged on both sides: `draft_content` holds the local or
/// source version, `original_content` the remote or target version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictFile {
    #[serde(flatten)]
    pub file: ConfigFile,
    #[serde(default)]
    pub resolve_strategy: Option<ResolveStrategy>,
}

impl ConflictFile {
    pub fn new(file: ConfigFile) -> Self {
        Self {
            file,
            resolve_strategy: None,
        }
    }

    pub fn resolved(mut self, strategy: ResolveStrategy) -> Self {
        self.resolve_strategy = Some(strategy);
        self
    }
}

// ---------------------------------------------------------------------------
// Diffs
// ---------------------------------------------------------------------------

/// Classification of a three-way diff, relative to the target side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    pub to_save: Vec<ConfigFile>,
    pub to_delete: Vec<ConfigFile>,
    /// `(source, target)` pairs.
    pub conflict: Vec<(ConfigFile, ConfigFile)>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.to_save.is_empty() && self.to_delete.is_empty() && self.conflict.is_empty()
    }
}

/// Mergeable changes between two branches, with content materialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchDiff {
    pub to_save: Vec<ConfigFile>,
    pub to_delete: Vec<ConfigFile>,
    pub conflict_files: Vec<ConflictFile>,
}

/// Caller-approved contents of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSelection {
    pub to_save: Vec<ConfigFile>,
    pub to_delete: Vec<ConfigFile>,
}

/// Payload of a conflict error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub conflict_files: Vec<ConflictFile>,
    #[serde(default)]
    pub diff: Option<BranchDiff>,
    #[serde(default)]
    pub src_branch: Option<String>,
    #[serde(default)]
    pub target_branch: Option<String>,
}

// ---------------------------------------------------------------------------
// Repository metadata
// ---------------------------------------------------------------------------

/// Persisted per-repository record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoMetadata {
    pub username: String,
    pub repository_url: String,
    pub repo_name: String,
    pub repo_folder: String,
    pub branch_name: String,
    /// branch -> repository path -> blob oid the draft was forked from.
    #[serde(rename = "commitBaseSHA", default)]
    pub commit_base_sha: BTreeMap<String, BTreeMap<String, ObjectId>>,
    pub version: String,
}

impl RepoMetadata {
    /// Recorded commit base of `path` on `branch`.
    pub fn commit_base(&self, branch: &str, path: &str) -> Option<&ObjectId> {
        self.commit_base_sha.get(branch).and_then(|m| m.get(path))
    }

    /// Apply base updates for one branch: `Some` records, `None` clears.
    /// Returns whether anything changed.
    pub fn record_commit_bases(
        &mut self,
        branch: &str,
        updates: BTreeMap<String, Option<ObjectId>>,
    ) -> bool {
        let mut changed = false;
        let bases = self.commit_base_sha.entry(branch.to_string()).or_default();
        for (path, oid) in updates {
            match oid {
                Some(oid) => {
                    if bases.get(&path) != Some(&oid) {
                        bases.insert(path, oid);
                        changed = true;
                    }
                }
                None => {
                    if bases.remove(&path).is_some() {
                        changed = true;
                    }
                }
            }
        }
        if bases.is_empty() {
            self.commit_base_sha.remove(branch);
        }
        changed
    }

    /// Forget every commit base of `branch`.
    pub fn clear_branch(&mut self, branch: &str) -> bool {
        self.commit_base_sha.remove(branch).is_some()
    }
}

// ---------------------------------------------------------------------------
// Sync results
// ---------------------------------------------------------------------------

/// Result of fetching every branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchOutcome {
    pub default_changed: bool,
    pub current_branch_deleted: bool,
}

/// Result of fetching one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchedBranch {
    pub commit: Option<ObjectId>,
    pub changed: bool,
}

/// Result of [`refresh`](crate::sync::RepoSession::refresh).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub pulled_commit: bool,
    pub branch_changed: bool,
    pub default_changed: bool,
}

/// Files of the current branch merged with the draft overlay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileListing {
    pub files: Vec<ConfigFile>,
    pub applications: Vec<String>,
    pub can_pull_request: bool,
    pub can_sync_default: bool,
}

/// Whether `checkout_branch` creates a branch or switches to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    Create,
    Switch,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> RepoMetadata {
        RepoMetadata {
            username: "alice".into(),
            repository_url: "https://github.com/acme/app-config.git".into(),
            repo_name: "app-config".into(),
            repo_folder: "alice@app-config".into(),
            branch_name: "master".into(),
            commit_base_sha: BTreeMap::new(),
            version: "1".into(),
        }
    }

    #[test]
    fn test_file_type_from_name() {
        assert_eq!(FileType::from_file_name("a.yaml", ".confrc"), Some(FileType::Yaml));
        assert_eq!(FileType::from_file_name("a.YML", ".confrc"), Some(FileType::Yaml));
        assert_eq!(FileType::from_file_name("README.md", ".confrc"), Some(FileType::Markdown));
        assert_eq!(FileType::from_file_name(".confrc", ".confrc"), Some(FileType::Settings));
        assert_eq!(FileType::from_file_name("build.sh", ".confrc"), None);
        assert_eq!(FileType::from_file_name("Makefile", ".confrc"), None);
    }

    #[test]
    fn test_metadata_json_shape() {
        let mut meta = metadata();
        meta.record_commit_bases(
            "master",
            BTreeMap::from([("apps/app1/a.yaml".to_string(), Some(ObjectId::from("aaa")))]),
        );
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["repoFolder"], "alice@app-config");
        assert_eq!(json["branchName"], "master");
        assert_eq!(json["commitBaseSHA"]["master"]["apps/app1/a.yaml"], "aaa");
    }

    #[test]
    fn test_record_commit_bases_reports_changes() {
        let mut meta = metadata();
        let path = "apps/app1/a.yaml".to_string();

        assert!(meta.record_commit_bases(
            "master",
            BTreeMap::from([(path.clone(), Some(ObjectId::from("aaa")))])
        ));
        // Same value again is not a change.
        assert!(!meta.record_commit_bases(
            "master",
            BTreeMap::from([(path.clone(), Some(ObjectId::from("aaa")))])
        ));
        assert_eq!(meta.commit_base("master", &path), Some(&ObjectId::from("aaa")));

        assert!(meta.record_commit_bases("master", BTreeMap::from([(path.clone(), None)])));
        assert!(meta.commit_base("master", &path).is_none());
        assert!(meta.commit_base_sha.is_empty());

        // Clearing something that is not there changes nothing.
        assert!(!meta.record_commit_bases("master", BTreeMap::from([(path, None)])));
    }

    #[test]
    fn test_object_id_short() {
        let oid = ObjectId::from("0123456789abcdef");
        assert_eq!(oid.short(), "0123456");
        assert_eq!(ObjectId::from("abc").short(), "abc");
    }
}
