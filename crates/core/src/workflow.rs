//! Draft and commit workflow on top of a [`RepoSession`].
//!
//! Drafts live in the overlay until they are committed. A commit is only
//! accepted when each file's remote blob is still the one its draft was
//! forked from (the recorded commit base); otherwise the whole commit is
//! rejected with a conflict carrying both versions.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::diff::{diff_manifests, three_way_diff};
use crate::errors::{EngineError, StoreError};
use crate::git::refs::local_ref;
use crate::git::{GitObject, ObjectStore};
use crate::history::find_merge_base;
use crate::manifest::{flatten, load_manifest, load_repo_files};
use crate::models::{
    BranchDiff, ConfigFile, ConflictFile, ConflictReport, FileListing, FileType, MergeSelection,
    ObjectId, ResolveStrategy,
};
use crate::paths::{file_key, FilePaths};
use crate::sync::RepoSession;
use crate::transaction::run_transaction;

/// Paths whose remote blob moved away from the expected base.
///
/// `expected` maps each path to the blob its draft was forked from (`None`
/// for a file that did not exist); `current` holds the remote blobs.
pub fn detect_conflicts(
    expected: &BTreeMap<String, Option<ObjectId>>,
    current: &BTreeMap<String, ObjectId>,
) -> Vec<String> {
    expected
        .iter()
        .filter(|(path, base)| match (base, current.get(*path)) {
            (None, Some(_)) => true,
            (Some(base), Some(remote)) => base != remote,
            _ => false,
        })
        .map(|(path, _)| path.clone())
        .collect()
}

impl<S: ObjectStore> RepoSession<S> {
    fn paths_of(&self, file: &ConfigFile) -> FilePaths {
        self.resolver
            .resolve(&self.metadata.repo_folder, &self.metadata.branch_name, file)
    }

    /// Blob id and text of `path` in `commit`, `None` if absent.
    fn read_text(
        &self,
        commit: &ObjectId,
        path: &str,
    ) -> Result<Option<(ObjectId, String)>, EngineError> {
        match self.store.read_path(commit, path) {
            Ok((oid, object)) => {
                let bytes = object.into_blob(&oid)?;
                let text = String::from_utf8(bytes)
                    .map_err(|e| StoreError::Codec(format!("{path} is not UTF-8: {e}")))?;
                Ok(Some((oid, text)))
            }
            Err(e) if e.is_missing_path() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn is_modified(
        &self,
        file_type: FileType,
        draft: Option<&str>,
        original: Option<&str>,
    ) -> bool {
        match (draft, original) {
            (Some(draft), Some(original)) => !self.codec.same_content(file_type, draft, original),
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn clear_commit_base(&mut self, branch: &str, path: &str) -> Result<(), EngineError> {
        if self
            .metadata
            .record_commit_bases(branch, BTreeMap::from([(path.to_string(), None)]))
        {
            self.save_metadata()?;
        }
        Ok(())
    }

    /// Remote content of `file` on the current branch plus its draft.
    ///
    /// A draft equal to the remote content is stale and is dropped together
    /// with its commit base.
    pub fn get_file_content(&mut self, file: &ConfigFile) -> Result<ConfigFile, EngineError> {
        let branch = self.metadata.branch_name.clone();
        let tip = self.branch_tip(&branch)?;
        let paths = self.paths_of(file);

        let remote = self.read_text(&tip, &paths.repo_file_path)?;
        let draft = self.drafts.read(&paths.draft_file_path)?;
        if remote.is_none() && draft.is_none() {
            return Err(EngineError::NotFound(file.label()));
        }

        let mut result = file.clone();
        result.draft_content = None;
        result.modified = false;
        match remote {
            Some((oid, text)) => {
                result.size = Some(text.len() as u64);
                result.oid = Some(oid);
                result.original_content = Some(text);
            }
            None => {
                result.oid = None;
                result.original_content = None;
            }
        }

        if let Some(draft) = draft {
            let original = result.original_content.as_deref();
            if self.is_modified(file.file_type, Some(draft.as_str()), original) {
                result.draft_content = Some(draft);
                result.modified = true;
            } else {
                warn!(file = %paths.repo_file_path, branch = %branch, "dropping stale draft");
                self.drafts.remove(&paths.draft_file_path)?;
                self.clear_commit_base(&branch, &paths.repo_file_path)?;
            }
        }
        Ok(result)
    }

    /// Store `file.draft_content` in the overlay, or drop the draft when it
    /// no longer differs from the remote content.
    pub fn save_draft(&mut self, file: &ConfigFile) -> Result<ConfigFile, EngineError> {
        let branch = self.metadata.branch_name.clone();
        let paths = self.paths_of(file);
        let mut file = file.clone();

        if file.original_content.is_none() {
            let tip = self.branch_tip(&branch)?;
            file.original_content =
                self.read_text(&tip, &paths.repo_file_path)?.map(|(_, text)| text);
        }

        file.modified = self.is_modified(
            file.file_type,
            file.draft_content.as_deref(),
            file.original_content.as_deref(),
        );

        match file.draft_content {
            Some(ref draft) if file.modified => {
                self.drafts.write(&paths.draft_file_path, draft)?;
                let recorded = self.metadata.commit_base(&branch, &paths.repo_file_path).is_some();
                if let (false, Some(oid)) = (recorded, file.oid.clone()) {
                    self.metadata.record_commit_bases(
                        &branch,
                        BTreeMap::from([(paths.repo_file_path.clone(), Some(oid))]),
                    );
                    self.save_metadata()?;
                }
                debug!(file = %paths.repo_file_path, branch = %branch, "draft saved");
            }
            _ => {
                if self.drafts.remove(&paths.draft_file_path)? {
                    debug!(
                        file = %paths.repo_file_path,
                        branch = %branch,
                        "draft matches remote, removed"
                    );
                }
                self.clear_commit_base(&branch, &paths.repo_file_path)?;
            }
        }
        Ok(file)
    }

    /// Commit drafts of `files` to the current branch.
    ///
    /// Unless `force`, every file must still be at its commit base upstream.
    /// With `force` the base check is skipped and the push overwrites the
    /// remote branch.
    /// Returned files are unmodified, with the committed text as their
    /// original content.
    pub fn commit_files(
        &mut self,
        files: Vec<ConfigFile>,
        message: &str,
        force: bool,
    ) -> Result<Vec<ConfigFile>, EngineError> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let branch = self.metadata.branch_name.clone();
        let pulled = self
            .fetch_branch(&branch, true)?
            .commit
            .ok_or_else(|| EngineError::NotFound(format!("branch '{branch}'")))?;

        let mut files = files;
        let mut paths = Vec::with_capacity(files.len());
        for file in &mut files {
            let file_paths = self.paths_of(file);
            if file.draft_content.is_none() {
                file.draft_content = self.drafts.read(&file_paths.draft_file_path)?;
            }
            if file.draft_content.is_none() {
                return Err(EngineError::NotFound(format!("draft of {}", file.label())));
            }
            paths.push(file_paths);
        }

        let mut current = BTreeMap::new();
        for p in &paths {
            match self.store.read_path(&pulled, &p.repo_file_path) {
                Ok((oid, _)) => {
                    current.insert(p.repo_file_path.clone(), oid);
                }
                Err(e) if e.is_missing_path() => {}
                Err(e) => return Err(e.into()),
            }
        }

        if !force {
            let mut expected = BTreeMap::new();
            let mut bases = BTreeMap::new();
            for (file, p) in files.iter().zip(&paths) {
                let base = self
                    .metadata
                    .commit_base(&branch, &p.repo_file_path)
                    .cloned()
                    .or_else(|| file.oid.clone());
                if let Some(ref base) = base {
                    bases.insert(p.repo_file_path.clone(), Some(base.clone()));
                }
                expected.insert(p.repo_file_path.clone(), base);
            }

            let conflicting: BTreeSet<String> =
                detect_conflicts(&expected, &current).into_iter().collect();
            if !conflicting.is_empty() {
                let mut conflict_files = Vec::new();
                for (file, p) in files.iter().zip(&paths) {
                    if conflicting.contains(&p.repo_file_path) {
                        let mut conflict = file.clone();
                        conflict.oid = current.get(&p.repo_file_path).cloned();
                        conflict.original_content =
                            self.read_text(&pulled, &p.repo_file_path)?.map(|(_, text)| text);
                        conflict.modified = true;
                        conflict_files.push(ConflictFile::new(conflict));
                    }
                }
                if self.metadata.record_commit_bases(&branch, bases) {
                    self.save_metadata()?;
                }
                warn!(
                    branch = %branch,
                    count = conflict_files.len(),
                    "commit rejected, files changed upstream"
                );
                return Err(EngineError::Conflict(Box::new(ConflictReport {
                    conflict_files,
                    diff: None,
                    src_branch: None,
                    target_branch: None,
                })));
            }
        }

        let staged: Vec<(String, String)> = files
            .iter()
            .zip(&paths)
            .map(|(file, p)| {
                let draft = file.draft_content.as_deref().unwrap_or_default();
                (p.repo_file_path.clone(), self.codec.canonicalize(file.file_type, draft))
            })
            .collect();

        let author = self.config.author();
        let mut blobs = BTreeMap::new();
        let commit = run_transaction(
            &mut self.store,
            &self.credentials,
            &branch,
            &pulled,
            force,
            |store| {
                for (path, text) in &staged {
                    blobs.insert(path.clone(), store.stage(path, text.as_bytes())?);
                }
                Ok(store.commit(&branch, message, &author)?)
            },
        )?;

        let mut cleared = BTreeMap::new();
        let mut committed = Vec::with_capacity(files.len());
        for ((mut file, p), (path, text)) in files.into_iter().zip(paths).zip(staged) {
            self.drafts.remove(&p.draft_file_path)?;
            cleared.insert(path.clone(), None);
            file.oid = blobs.remove(&path);
            file.size = Some(text.len() as u64);
            file.original_content = Some(text);
            file.draft_content = None;
            file.modified = false;
            committed.push(file);
        }
        if self.metadata.record_commit_bases(&branch, cleared) {
            self.save_metadata()?;
        }

        info!(
            branch = %branch,
            commit = %commit.short(),
            files = committed.len(),
            "committed files"
        );
        Ok(committed)
    }

    /// Settle conflicts reported by [`commit_files`](Self::commit_files).
    ///
    /// Files that still differ from the remote are committed without the
    /// base check; the rest only have their drafts dropped.
    pub fn resolve_conflicts(
        &mut self,
        conflicts: Vec<ConflictFile>,
        message: &str,
    ) -> Result<Vec<ConfigFile>, EngineError> {
        let mut divergent = Vec::new();
        let mut settled = Vec::new();
        for conflict in conflicts {
            let strategy = conflict
                .resolve_strategy
                .ok_or_else(|| EngineError::UnresolvedConflict(conflict.file.label()))?;
            let mut file = conflict.file;
            if strategy == ResolveStrategy::KeepRemote {
                file.draft_content = file.original_content.clone();
            }
            let draft = file.draft_content.as_deref();
            if self.is_modified(file.file_type, draft, file.original_content.as_deref()) {
                divergent.push(file);
            } else {
                settled.push(file);
            }
        }

        let mut resolved = self.commit_files(divergent, message, true)?;
        for file in settled {
            let mut file = self.save_draft(&file)?;
            file.draft_content = None;
            resolved.push(file);
        }
        Ok(resolved)
    }

    /// Delete `file` upstream if it exists there, and drop its draft.
    ///
    /// Returns whether the fetch before the delete pulled new commits.
    pub fn delete_file(&mut self, file: &ConfigFile) -> Result<bool, EngineError> {
        let branch = self.metadata.branch_name.clone();
        let paths = self.paths_of(file);
        let path = paths.repo_file_path.clone();
        let tip = self.branch_tip(&branch)?;

        let mut pulled_new = false;
        if self.read_text(&tip, &path)?.is_some() {
            let fetched = self.fetch_branch(&branch, true)?;
            pulled_new = fetched.changed;
            let pulled = fetched.commit.unwrap_or(tip);

            if self.read_text(&pulled, &path)?.is_some() {
                let author = self.config.author();
                let message = format!("Delete {path}");
                let commit = run_transaction(
                    &mut self.store,
                    &self.credentials,
                    &branch,
                    &pulled,
                    false,
                    |store| {
                        store.remove(&path)?;
                        Ok(store.commit(&branch, &message, &author)?)
                    },
                )?;
                info!(branch = %branch, file = %path, commit = %commit.short(), "deleted file");
            }
        }

        self.drafts.remove(&paths.draft_file_path)?;
        self.clear_commit_base(&branch, &path)?;
        Ok(pulled_new)
    }

    /// What merging `src` into `target` would change, with content.
    pub fn branch_diff(&mut self, src: &str, target: &str) -> Result<BranchDiff, EngineError> {
        self.fetch_branch(src, true)?;
        self.fetch_branch(target, true)?;
        let src_tip = self.branch_tip(src)?;
        let target_tip = self.branch_tip(target)?;

        let base = find_merge_base(&self.store, &src_tip, &target_tip)?;
        let diff = three_way_diff(
            &self.store,
            &self.config.layout,
            &src_tip,
            &target_tip,
            base.as_ref(),
        )?;

        let mut result = BranchDiff {
            to_delete: diff.to_delete,
            ..BranchDiff::default()
        };
        for mut file in diff.to_save {
            let path = self.resolver.repo_file_path(&file);
            file.draft_content = self.read_text(&src_tip, &path)?.map(|(_, text)| text);
            result.to_save.push(file);
        }
        for (src_file, target_file) in diff.conflict {
            let src_path = self.resolver.repo_file_path(&src_file);
            let target_path = self.resolver.repo_file_path(&target_file);
            let mut file = target_file;
            file.draft_content = self.read_text(&src_tip, &src_path)?.map(|(_, text)| text);
            file.original_content =
                self.read_text(&target_tip, &target_path)?.map(|(_, text)| text);
            file.modified = true;
            result.conflict_files.push(ConflictFile::new(file));
        }

        debug!(
            src,
            target,
            to_save = result.to_save.len(),
            to_delete = result.to_delete.len(),
            conflicts = result.conflict_files.len(),
            "branch diff"
        );
        Ok(result)
    }

    /// Merge `src` into `target` and return the merge commit.
    ///
    /// Without a selection the branch diff is applied as is, and any
    /// conflict aborts the merge.
    pub fn merge_branch(
        &mut self,
        src: &str,
        target: &str,
        selection: Option<MergeSelection>,
    ) -> Result<ObjectId, EngineError> {
        let selection = match selection {
            Some(selection) => {
                self.fetch_branch(src, true)?;
                self.fetch_branch(target, true)?;
                selection
            }
            None => {
                let diff = self.branch_diff(src, target)?;
                if !diff.conflict_files.is_empty() {
                    warn!(src, target, count = diff.conflict_files.len(), "merge has conflicts");
                    return Err(EngineError::Conflict(Box::new(ConflictReport {
                        conflict_files: diff.conflict_files.clone(),
                        diff: Some(diff),
                        src_branch: Some(src.to_string()),
                        target_branch: Some(target.to_string()),
                    })));
                }
                MergeSelection {
                    to_save: diff.to_save,
                    to_delete: diff.to_delete,
                }
            }
        };

        let src_tip = self.branch_tip(src)?;
        let target_tip = self.branch_tip(target)?;

        let mut staged = Vec::with_capacity(selection.to_save.len());
        for file in &selection.to_save {
            let path = self.resolver.repo_file_path(file);
            let content = match file.draft_content {
                Some(ref content) => content.clone(),
                None => self
                    .read_text(&src_tip, &path)?
                    .map(|(_, text)| text)
                    .ok_or_else(|| {
                        EngineError::NotFound(format!("{} on branch '{src}'", file.label()))
                    })?,
            };
            staged.push((path, self.codec.canonicalize(file.file_type, &content)));
        }
        let removed: Vec<String> = selection
            .to_delete
            .iter()
            .map(|file| self.resolver.repo_file_path(file))
            .collect();

        let author = self.config.author();
        let message = format!("Sync {src} into {target}");
        let merge = run_transaction(
            &mut self.store,
            &self.credentials,
            target,
            &target_tip,
            false,
            |store| {
                for (path, text) in &staged {
                    store.stage(path, text.as_bytes())?;
                }
                for path in &removed {
                    store.remove(path)?;
                }
                let content = store.commit(target, &message, &author)?;
                let mut commit = store.read_object(&content)?.into_commit(&content)?;
                commit.parents = vec![content, src_tip.clone()];
                let merge = store.write_object(&GitObject::Commit(commit))?;
                store.write_ref(&local_ref(target), &merge, true)?;
                Ok(merge)
            },
        )?;

        info!(
            src,
            target,
            merge = %merge.short(),
            saved = staged.len(),
            deleted = removed.len(),
            "merged branch"
        );
        Ok(merge)
    }

    /// Files of the current branch merged with its drafts.
    pub fn list_files(&self) -> Result<FileListing, EngineError> {
        let branch = self.metadata.branch_name.as_str();
        let default_branch = self.config.remote.default_branch.as_str();
        let layout = &self.config.layout;
        let tip = self.branch_tip(branch)?;

        let repo_files = load_repo_files(&self.store, layout, &tip)?;
        let branch_manifest = flatten(&repo_files);
        let drafts = self.drafts.list(branch)?;

        let mut merged = branch_manifest.clone();
        for draft in drafts.files {
            merged
                .entry(file_key(&draft))
                .and_modify(|file| file.modified = true)
                .or_insert(draft);
        }

        let applications: BTreeSet<String> = repo_files
            .keys()
            .cloned()
            .chain(drafts.applications)
            .filter(|app| !app.is_empty() && app != &layout.apps_folder)
            .collect();

        let (can_pull_request, can_sync_default) = if branch != default_branch {
            let default_tip = self.branch_tip(default_branch)?;
            let default_manifest = load_manifest(&self.store, layout, &default_tip)?;
            let base = find_merge_base(&self.store, &tip, &default_tip)?;
            let outgoing = diff_manifests(
                &self.store,
                layout,
                &tip,
                &default_tip,
                &branch_manifest,
                &default_manifest,
                base.as_ref(),
            )?;
            let incoming = diff_manifests(
                &self.store,
                layout,
                &default_tip,
                &tip,
                &default_manifest,
                &branch_manifest,
                base.as_ref(),
            )?;
            (!outgoing.is_empty(), !incoming.is_empty())
        } else {
            (false, false)
        };

        Ok(FileListing {
            files: merged.into_values().collect(),
            applications: applications.into_iter().collect(),
            can_pull_request,
            can_sync_default,
        })
    }

    /// Settings of `application`: the apps-folder settings file overlaid
    /// with the application's own, drafts preferred over committed copies.
    pub fn app_settings(&self, application: &str) -> Result<serde_json::Value, EngineError> {
        let tip = self.branch_tip(&self.metadata.branch_name)?;
        let apps_folder = self.config.layout.apps_folder.as_str();

        let mut levels = vec![apps_folder];
        if application != apps_folder {
            levels.push(application);
        }

        let mut merged = serde_json::Map::new();
        for level in levels {
            let settings_file = self.config.layout.settings_file.as_str();
            let file = ConfigFile::new(level, settings_file, FileType::Settings);
            let paths = self.paths_of(&file);
            let content = match self.drafts.read(&paths.draft_file_path)? {
                Some(draft) => Some(draft),
                None => self.read_text(&tip, &paths.repo_file_path)?.map(|(_, text)| text),
            };
            let Some(content) = content else {
                continue;
            };
            match serde_json::from_str::<serde_json::Value>(&content) {
                Ok(serde_json::Value::Object(settings)) => merged.extend(settings),
                Ok(_) => warn!(file = %paths.repo_file_path, "settings file is not a JSON object"),
                Err(e) => {
                    warn!(file = %paths.repo_file_path, error = %e, "unparsable settings file")
                }
            }
        }
        Ok(serde_json::Value::Object(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(s: &str) -> ObjectId {
        ObjectId::from(s)
    }

    #[test]
    fn test_unchanged_remote_is_not_a_conflict() {
        let expected = BTreeMap::from([("apps/app1/a.yaml".to_string(), Some(oid("aaa")))]);
        let current = BTreeMap::from([("apps/app1/a.yaml".to_string(), oid("aaa"))]);
        assert!(detect_conflicts(&expected, &current).is_empty());
    }

    #[test]
    fn test_moved_remote_is_a_conflict() {
        let expected = BTreeMap::from([("apps/app1/a.yaml".to_string(), Some(oid("aaa")))]);
        let current = BTreeMap::from([("apps/app1/a.yaml".to_string(), oid("bbb"))]);
        assert_eq!(detect_conflicts(&expected, &current), vec!["apps/app1/a.yaml"]);
    }

    #[test]
    fn test_new_file_created_upstream_is_a_conflict() {
        let expected = BTreeMap::from([("apps/app1/new.yaml".to_string(), None)]);
        let current = BTreeMap::from([("apps/app1/new.yaml".to_string(), oid("ccc"))]);
        assert_eq!(detect_conflicts(&expected, &current), vec!["apps/app1/new.yaml"]);

        assert!(detect_conflicts(&expected, &BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_file_deleted_upstream_is_not_a_conflict() {
        let expected = BTreeMap::from([("apps/app1/a.yaml".to_string(), Some(oid("aaa")))]);
        assert!(detect_conflicts(&expected, &BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_detection_is_deterministic() {
        let expected = BTreeMap::from([
            ("b.md".to_string(), Some(oid("1"))),
            ("a.md".to_string(), None),
            ("c.md".to_string(), Some(oid("3"))),
        ]);
        let current = BTreeMap::from([
            ("a.md".to_string(), oid("9")),
            ("b.md".to_string(), oid("2")),
            ("c.md".to_string(), oid("3")),
        ]);
        let first = detect_conflicts(&expected, &current);
        assert_eq!(first, vec!["a.md", "b.md"]);
        assert_eq!(detect_conflicts(&expected, &current), first);
    }
}
