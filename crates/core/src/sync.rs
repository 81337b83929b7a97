//! Repository sessions: clone or reopen, fetch, and branch management.
//!
//! A [`RepoSession`] owns one local clone and the state kept beside it (the
//! draft overlay and the metadata file). Every operation that talks to the
//! remote goes through here, and remote-facing store errors are translated
//! into the engine taxonomy at this boundary.

use std::collections::BTreeSet;
use std::fs;

use tracing::{debug, info, instrument, warn};

use crate::codec::{ContentCodec, DefaultCodec};
use crate::config::{EngineConfig, METADATA_VERSION};
use crate::errors::{EngineError, StoreError};
use crate::git::refs::{branch_of_local, local_ref, remote_ref, HEAD, REMOTE_NAME};
use crate::git::remote_url::derive_repo_folder;
use crate::git::{Credentials, ObjectStore, StoreBackend};
use crate::metadata::MetadataStore;
use crate::models::{
    CheckoutMode, FetchOutcome, FetchedBranch, ObjectId, RefreshOutcome, RepoMetadata,
};
use crate::overlay::DraftStore;
use crate::paths::PathResolver;
use crate::transaction::run_transaction;

/// One user's working session on one repository.
pub struct RepoSession<S: ObjectStore> {
    pub(crate) store: S,
    pub(crate) config: EngineConfig,
    pub(crate) credentials: Credentials,
    pub(crate) metadata: RepoMetadata,
    pub(crate) metadata_store: MetadataStore,
    pub(crate) drafts: DraftStore,
    pub(crate) resolver: PathResolver,
    pub(crate) codec: Box<dyn ContentCodec>,
}

impl<S: ObjectStore> std::fmt::Debug for RepoSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoSession")
            .field("repo_folder", &self.metadata.repo_folder)
            .field("branch", &self.metadata.branch_name)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

/// Clone the repository, or reopen and fetch an existing clone.
///
/// The session always starts on the default branch. Commit bases recorded
/// by earlier sessions are kept.
#[instrument(
    skip(config, backend, credentials),
    fields(url = %config.remote.url, user = %credentials.username)
)]
pub fn access_repo<B: StoreBackend>(
    config: EngineConfig,
    backend: &B,
    credentials: Credentials,
) -> Result<RepoSession<B::Store>, EngineError> {
    let folder = derive_repo_folder(&credentials.username, &config.remote.url);
    let repo_dir = config.engine.repos_dir().join(&folder.repo_folder);
    let metadata_store = MetadataStore::new(&config.engine.metadata_dir(), &folder.repo_folder);
    let default_branch = config.remote.default_branch.clone();

    let existing = metadata_store.load();
    if existing.is_none() && repo_dir.exists() {
        warn!(path = %repo_dir.display(), "removing clone without usable metadata");
        fs::remove_dir_all(&repo_dir)?;
    }

    let reusable = existing.filter(|_| repo_dir.exists());
    let (store, commit_bases, reopened) = match reusable {
        Some(meta) => {
            info!(path = %repo_dir.display(), "reopening existing clone");
            (backend.open(&repo_dir)?, meta.commit_base_sha, true)
        }
        None => {
            fs::create_dir_all(config.engine.repos_dir())?;
            info!(
                path = %repo_dir.display(),
                depth = config.remote.clone_depth,
                branch = %default_branch,
                "cloning repository"
            );
            match backend.clone_shallow(
                &repo_dir,
                &config.remote.url,
                &default_branch,
                config.remote.clone_depth,
                &credentials,
            ) {
                Ok(store) => (store, Default::default(), false),
                Err(e) => {
                    warn!(error = %e, "clone failed, removing partial clone");
                    if repo_dir.exists() {
                        fs::remove_dir_all(&repo_dir)?;
                    }
                    return Err(EngineError::from_remote(e));
                }
            }
        }
    };

    let metadata = RepoMetadata {
        username: credentials.username.clone(),
        repository_url: config.remote.url.clone(),
        repo_name: folder.repo_name,
        repo_folder: folder.repo_folder,
        branch_name: default_branch.clone(),
        commit_base_sha: commit_bases,
        version: METADATA_VERSION.to_string(),
    };

    let mut session = RepoSession::assemble(config, store, credentials, metadata, metadata_store);
    if reopened {
        session.fetch_all_branches()?;
    }
    session.store.write_symbolic_ref(HEAD, &local_ref(&default_branch))?;
    session.drafts.ensure_root()?;
    session.save_metadata()?;
    info!(repo = %session.metadata.repo_name, "repository ready");
    Ok(session)
}

/// Reopen a previously accessed repository without touching the network.
pub fn open_session<B: StoreBackend>(
    config: EngineConfig,
    backend: &B,
    credentials: Credentials,
) -> Result<RepoSession<B::Store>, EngineError> {
    let folder = derive_repo_folder(&credentials.username, &config.remote.url);
    let repo_dir = config.engine.repos_dir().join(&folder.repo_folder);
    let metadata_store = MetadataStore::new(&config.engine.metadata_dir(), &folder.repo_folder);

    let metadata = metadata_store
        .load()
        .filter(|_| repo_dir.exists())
        .ok_or_else(|| EngineError::NotFound(format!("repository '{}'", folder.repo_name)))?;
    let store = backend.open(&repo_dir)?;
    debug!(repo = %metadata.repo_name, branch = %metadata.branch_name, "session reopened");
    Ok(RepoSession::assemble(config, store, credentials, metadata, metadata_store))
}

impl<S: ObjectStore> RepoSession<S> {
    fn assemble(
        config: EngineConfig,
        store: S,
        credentials: Credentials,
        metadata: RepoMetadata,
        metadata_store: MetadataStore,
    ) -> Self {
        let drafts_dir = config.engine.drafts_dir();
        Self {
            drafts: DraftStore::new(&drafts_dir, &metadata.repo_folder, &config.layout),
            resolver: PathResolver::new(&config.layout, drafts_dir),
            codec: Box::new(DefaultCodec),
            store,
            config,
            credentials,
            metadata,
            metadata_store,
        }
    }

    /// Replace the content codec used for comparisons and staging.
    pub fn with_codec(mut self, codec: Box<dyn ContentCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metadata(&self) -> &RepoMetadata {
        &self.metadata
    }

    pub fn drafts(&self) -> &DraftStore {
        &self.drafts
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn current_branch(&self) -> &str {
        &self.metadata.branch_name
    }

    pub fn default_branch(&self) -> &str {
        &self.config.remote.default_branch
    }

    pub(crate) fn save_metadata(&self) -> Result<(), EngineError> {
        self.metadata_store.save(&self.metadata)
    }

    /// Last fetched tip of `branch`.
    pub fn branch_tip(&self, branch: &str) -> Result<ObjectId, EngineError> {
        match self.store.read_ref(&remote_ref(branch)) {
            Ok(oid) => Ok(oid),
            Err(StoreError::RefNotFound(_)) => {
                Err(EngineError::NotFound(format!("branch '{branch}'")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Point `refs/heads/<to>` at the remote-tracking tip of `from`.
    pub fn sync_head_commit(&mut self, from: &str, to: &str) -> Result<ObjectId, EngineError> {
        let oid = self.branch_tip(from)?;
        self.store.write_ref(&local_ref(to), &oid, true)?;
        debug!(from, to, oid = %oid.short(), "local head synced");
        Ok(oid)
    }

    /// Fetch one branch (or everything unless `single`) and bring its local
    /// head up to the fetched tip.
    pub fn fetch_branch(
        &mut self,
        branch: &str,
        single: bool,
    ) -> Result<FetchedBranch, EngineError> {
        let last = match self.store.read_ref(&remote_ref(branch)) {
            Ok(oid) => Some(oid),
            Err(StoreError::RefNotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        match self.store.fetch(branch, single, &self.credentials) {
            Ok(()) => {}
            Err(StoreError::RefNotFound(detail)) => {
                warn!(branch, %detail, "remote branch vanished during fetch");
                return Ok(FetchedBranch {
                    commit: last,
                    changed: false,
                });
            }
            Err(e) => return Err(EngineError::from_remote(e)),
        }

        let commit = self.sync_head_commit(branch, branch)?;
        let changed = last.as_ref() != Some(&commit);
        if changed {
            info!(branch, tip = %commit.short(), "fetched new commits");
        }
        Ok(FetchedBranch {
            commit: Some(commit),
            changed,
        })
    }

    /// Fetch every branch and drop local state of branches deleted upstream.
    pub fn fetch_all_branches(&mut self) -> Result<FetchOutcome, EngineError> {
        let default_branch = self.config.remote.default_branch.clone();
        let fetched = self.fetch_branch(&default_branch, false)?;

        let mut upstream: BTreeSet<String> = self
            .store
            .remote_refs(&self.credentials)
            .map_err(EngineError::from_remote)?
            .keys()
            .filter_map(|name| branch_of_local(name))
            .map(str::to_string)
            .collect();
        upstream.insert(HEAD.to_string());

        let tracked = self.store.list_branches(Some(REMOTE_NAME))?;
        let mut metadata_changed = false;
        for branch in tracked.iter().filter(|b| !upstream.contains(*b)) {
            info!(branch = %branch, "branch deleted upstream, dropping local state");
            self.store.delete_ref(&remote_ref(branch))?;
            self.store.delete_ref(&local_ref(branch))?;
            self.drafts.remove_branch(branch)?;
            metadata_changed |= self.metadata.clear_branch(branch);
        }
        if metadata_changed {
            self.save_metadata()?;
        }

        Ok(FetchOutcome {
            default_changed: fetched.changed,
            current_branch_deleted: !upstream.contains(&self.metadata.branch_name),
        })
    }

    /// Fetch everything and bring the current branch up to date.
    ///
    /// When the current branch was deleted upstream the session moves back
    /// to the default branch and [`EngineError::CurrentBranchDeleted`] is
    /// returned.
    pub fn refresh(&mut self) -> Result<RefreshOutcome, EngineError> {
        let branch = self.metadata.branch_name.clone();
        let default_branch = self.config.remote.default_branch.clone();
        // Read before fetching: a full fetch moves every remote-tracking ref.
        let last = match self.store.read_ref(&remote_ref(&branch)) {
            Ok(oid) => Some(oid),
            Err(StoreError::RefNotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let outcome = self.fetch_all_branches()?;

        if outcome.current_branch_deleted {
            warn!(branch = %branch, "current branch deleted upstream, returning to default branch");
            self.store.write_symbolic_ref(HEAD, &local_ref(&default_branch))?;
            self.metadata.branch_name = default_branch;
            self.save_metadata()?;
            return Err(EngineError::CurrentBranchDeleted(branch));
        }

        let branch_changed = if branch == default_branch {
            outcome.default_changed
        } else {
            let tip = self.sync_head_commit(&branch, &branch)?;
            last.as_ref() != Some(&tip)
        };
        Ok(RefreshOutcome {
            pulled_commit: branch_changed || outcome.default_changed,
            branch_changed,
            default_changed: outcome.default_changed,
        })
    }

    /// Local and remote-tracking branch names, without locked branches.
    pub fn list_branches(&self) -> Result<Vec<String>, EngineError> {
        let locked = &self.config.remote.locked_branches;
        let mut names: BTreeSet<String> = self.store.list_branches(None)?.into_iter().collect();
        names.extend(self.store.list_branches(Some(REMOTE_NAME))?);
        Ok(names
            .into_iter()
            .filter(|name| name != HEAD && !locked.contains(name))
            .collect())
    }

    /// Create a branch off the default branch, or switch to an existing one.
    #[instrument(skip(self), fields(repo = %self.metadata.repo_folder))]
    pub fn checkout_branch(&mut self, mode: CheckoutMode, branch: &str) -> Result<(), EngineError> {
        match mode {
            CheckoutMode::Create => self.create_branch(branch)?,
            CheckoutMode::Switch => {
                self.sync_head_commit(branch, branch)?;
                self.store.write_symbolic_ref(HEAD, &local_ref(branch))?;
                info!(branch, "switched branch");
            }
        }
        self.metadata.branch_name = branch.to_string();
        self.save_metadata()
    }

    fn create_branch(&mut self, branch: &str) -> Result<(), EngineError> {
        let upstream = self
            .store
            .remote_refs(&self.credentials)
            .map_err(EngineError::from_remote)?;
        if upstream.contains_key(&local_ref(branch)) {
            return Err(EngineError::BranchExists(branch.to_string()));
        }

        let default_branch = self.config.remote.default_branch.clone();
        let base = self.sync_head_commit(&default_branch, branch)?;
        let previous = self.store.current_branch()?;
        self.store.write_symbolic_ref(HEAD, &local_ref(branch))?;

        let author = self.config.author();
        let message = format!("Create Branch {branch}");
        let result = run_transaction(
            &mut self.store,
            &self.credentials,
            branch,
            &base,
            false,
            |store| Ok(store.commit(branch, &message, &author)?),
        );

        match result {
            Ok(tip) => {
                info!(branch, base = %default_branch, tip = %tip.short(), "created branch");
                Ok(())
            }
            Err(e) => {
                if let Some(previous) = previous {
                    self.store.write_symbolic_ref(HEAD, &local_ref(&previous))?;
                }
                self.store.delete_ref(&local_ref(branch))?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorStatus;
    use crate::git::MemoryRemote;
    use std::collections::BTreeMap;

    fn seeded() -> MemoryRemote {
        let remote = MemoryRemote::new();
        remote
            .commit_to_branch("master", &[("apps/app1/a.yaml", Some("a: 1"))], "seed")
            .unwrap();
        remote
    }

    fn config(dir: &std::path::Path) -> EngineConfig {
        EngineConfig::new("memory://acme/app-config", "alice", dir.to_path_buf())
    }

    fn creds() -> Credentials {
        Credentials {
            username: "alice".into(),
            password: None,
        }
    }

    #[test]
    fn test_access_clones_and_persists_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let remote = seeded();
        let session = access_repo(config(dir.path()), &remote, creds()).unwrap();

        assert_eq!(session.current_branch(), "master");
        assert_eq!(session.metadata().repo_name, "acme/app-config");
        assert!(session.drafts().root().is_dir());

        let metadata_dir = dir.path().join("metadata");
        let stored = MetadataStore::new(&metadata_dir, &session.metadata().repo_folder)
            .load()
            .unwrap();
        assert_eq!(stored, *session.metadata());
    }

    #[test]
    fn test_access_again_preserves_commit_bases_and_resets_branch() {
        let dir = tempfile::tempdir().unwrap();
        let remote = seeded();
        remote.create_branch("feature", "master").unwrap();

        let mut session = access_repo(config(dir.path()), &remote, creds()).unwrap();
        session.checkout_branch(CheckoutMode::Switch, "feature").unwrap();
        session.metadata.record_commit_bases(
            "feature",
            BTreeMap::from([("apps/app1/a.yaml".to_string(), Some(ObjectId::from("aaa")))]),
        );
        session.save_metadata().unwrap();
        drop(session);

        let session = access_repo(config(dir.path()), &remote, creds()).unwrap();
        assert_eq!(session.current_branch(), "master");
        assert_eq!(
            session.metadata().commit_base("feature", "apps/app1/a.yaml"),
            Some(&ObjectId::from("aaa"))
        );
    }

    #[test]
    fn test_access_with_wrong_password_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let remote = seeded().with_password("s3cret");
        let mut bad = creds();
        bad.password = Some("nope".into());

        let err = access_repo(config(dir.path()), &remote, bad).unwrap_err();
        assert_eq!(err.status(), ErrorStatus::Unauthorized);
        let folder = derive_repo_folder("alice", "memory://acme/app-config");
        assert!(!dir.path().join("repos").join(folder.repo_folder).exists());
    }

    #[test]
    fn test_open_session_requires_access() {
        let dir = tempfile::tempdir().unwrap();
        let remote = seeded();
        let err = open_session(config(dir.path()), &remote, creds()).unwrap_err();
        assert_eq!(err.status(), ErrorStatus::NotFound);

        access_repo(config(dir.path()), &remote, creds()).unwrap();
        let session = open_session(config(dir.path()), &remote, creds()).unwrap();
        assert_eq!(session.current_branch(), "master");
    }

    #[test]
    fn test_fetch_branch_reports_changes() {
        let dir = tempfile::tempdir().unwrap();
        let remote = seeded();
        let mut session = access_repo(config(dir.path()), &remote, creds()).unwrap();

        let first = session.fetch_branch("master", true).unwrap();
        assert!(!first.changed);

        let tip = remote
            .commit_to_branch("master", &[("apps/app1/b.yaml", Some("b: 1"))], "more")
            .unwrap();
        let second = session.fetch_branch("master", true).unwrap();
        assert!(second.changed);
        assert_eq!(second.commit, Some(tip.clone()));
        assert_eq!(session.store().read_ref(&local_ref("master")).unwrap(), tip);
    }

    #[test]
    fn test_fetch_of_vanished_branch_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let remote = seeded();
        remote.create_branch("gone", "master").unwrap();
        let mut session = access_repo(config(dir.path()), &remote, creds()).unwrap();
        let last = session.branch_tip("gone").unwrap();

        remote.delete_branch("gone");
        let fetched = session.fetch_branch("gone", true).unwrap();
        assert_eq!(fetched, FetchedBranch { commit: Some(last), changed: false });
    }

    #[test]
    fn test_deleted_branch_state_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let remote = seeded();
        remote.create_branch("feature", "master").unwrap();
        let mut session = access_repo(config(dir.path()), &remote, creds()).unwrap();

        session.checkout_branch(CheckoutMode::Switch, "feature").unwrap();
        let draft_dir = session.drafts().branch_dir("feature");
        fs::create_dir_all(&draft_dir).unwrap();
        session.metadata.record_commit_bases(
            "feature",
            BTreeMap::from([("apps/app1/a.yaml".to_string(), Some(ObjectId::from("aaa")))]),
        );

        remote.delete_branch("feature");
        let err = session.refresh().unwrap_err();
        assert_eq!(err.status(), ErrorStatus::BranchDeleted);
        assert_eq!(session.current_branch(), "master");
        assert!(!draft_dir.exists());
        assert!(session.metadata().commit_base_sha.get("feature").is_none());
        assert!(!session.list_branches().unwrap().contains(&"feature".to_string()));
    }

    #[test]
    fn test_refresh_on_feature_branch_reports_new_commits() {
        let dir = tempfile::tempdir().unwrap();
        let remote = seeded();
        remote.create_branch("feature", "master").unwrap();
        let mut session = access_repo(config(dir.path()), &remote, creds()).unwrap();
        session.checkout_branch(CheckoutMode::Switch, "feature").unwrap();

        let tip = remote
            .commit_to_branch("feature", &[("apps/app1/b.yaml", Some("b: 1"))], "upstream")
            .unwrap();
        let outcome = session.refresh().unwrap();
        assert_eq!(
            outcome,
            RefreshOutcome {
                pulled_commit: true,
                branch_changed: true,
                default_changed: false,
            }
        );
        assert_eq!(session.store().read_ref(&local_ref("feature")).unwrap(), tip);

        let again = session.refresh().unwrap();
        assert_eq!(again, RefreshOutcome::default());
    }

    #[test]
    fn test_refresh_on_default_branch_reports_new_commits() {
        let dir = tempfile::tempdir().unwrap();
        let remote = seeded();
        let mut session = access_repo(config(dir.path()), &remote, creds()).unwrap();

        remote
            .commit_to_branch("master", &[("apps/app1/a.yaml", Some("a: 2"))], "upstream")
            .unwrap();
        let outcome = session.refresh().unwrap();
        assert!(outcome.branch_changed && outcome.default_changed && outcome.pulled_commit);
    }

    #[test]
    fn test_create_branch() {
        let dir = tempfile::tempdir().unwrap();
        let remote = seeded();
        let mut session = access_repo(config(dir.path()), &remote, creds()).unwrap();

        session.checkout_branch(CheckoutMode::Create, "feature").unwrap();
        assert_eq!(session.current_branch(), "feature");
        assert_eq!(session.store().current_branch().unwrap().as_deref(), Some("feature"));

        let tip = remote.branch_tip("feature").unwrap();
        let commit = remote.commit(&tip).unwrap();
        assert_eq!(commit.message, "Create Branch feature");
        assert_eq!(commit.parents, vec![remote.branch_tip("master").unwrap()]);
        assert_eq!(session.branch_tip("feature").unwrap(), tip);

        let err = session.checkout_branch(CheckoutMode::Create, "feature").unwrap_err();
        assert!(matches!(err, EngineError::BranchExists(_)));
    }

    #[test]
    fn test_failed_create_restores_head() {
        let dir = tempfile::tempdir().unwrap();
        let remote = seeded();
        let mut session = access_repo(config(dir.path()), &remote, creds()).unwrap();
        remote.fail_next_pushes(1);

        assert!(session.checkout_branch(CheckoutMode::Create, "feature").is_err());
        assert_eq!(session.current_branch(), "master");
        assert_eq!(session.store().current_branch().unwrap().as_deref(), Some("master"));
        assert!(!session.store().list_branches(None).unwrap().contains(&"feature".to_string()));
        assert!(remote.branch_tip("feature").is_none());
    }

    #[test]
    fn test_list_branches_hides_locked() {
        let dir = tempfile::tempdir().unwrap();
        let remote = seeded();
        remote.create_branch("release", "master").unwrap();
        remote.create_branch("feature", "master").unwrap();
        let mut cfg = config(dir.path());
        cfg.remote.locked_branches = vec!["release".into()];

        let session = access_repo(cfg, &remote, creds()).unwrap();
        assert_eq!(session.list_branches().unwrap(), vec!["feature", "master"]);
    }

    #[test]
    fn test_switch_to_unknown_branch_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let remote = seeded();
        let mut session = access_repo(config(dir.path()), &remote, creds()).unwrap();
        let err = session.checkout_branch(CheckoutMode::Switch, "nope").unwrap_err();
        assert_eq!(err.status(), ErrorStatus::NotFound);
    }
}
