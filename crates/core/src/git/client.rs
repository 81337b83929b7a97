//! Local Git repository operations via `git2`.
//!
//! Clones are made without a checkout: files are read straight from the
//! object database, and the index is only ever populated from trees.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    BranchType, Cred, CredentialType, Direction, ErrorClass, ErrorCode, FetchOptions,
    FetchPrune, IndexEntry, IndexTime, ObjectType, Oid, PushOptions, RemoteCallbacks,
    Repository, Time, TreeWalkMode, TreeWalkResult,
};
use tracing::{debug, info, instrument, warn};

use crate::errors::StoreError;
use crate::git::refs::{local_ref, HEAD, REMOTE_NAME};
use crate::git::store::{
    CommitObject, Credentials, EntryKind, GitObject, ObjectStore, Signature, StoreBackend,
    TreeEntry,
};
use crate::models::ObjectId;

const BLOB_MODE: u32 = 0o100644;
const MAX_AUTH_ATTEMPTS: u32 = 3;

/// Creates and opens `git2` clones.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitBackend;

/// A local clone backed by a `git2::Repository`.
pub struct GitStore {
    repo: Repository,
    repo_path: PathBuf,
}

impl StoreBackend for GitBackend {
    type Store = GitStore;

    #[instrument(skip(self, creds), fields(url = %url, path = %dir.display()))]
    fn clone_shallow(
        &self,
        dir: &Path,
        url: &str,
        branch: &str,
        depth: u32,
        creds: &Credentials,
    ) -> Result<GitStore, StoreError> {
        info!(depth, "cloning git repository");

        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks(creds));
        if depth > 0 {
            fetch_opts.depth(depth as i32);
        }

        // Files are never materialized on disk.
        let mut checkout = CheckoutBuilder::new();
        checkout.dry_run();

        let mut builder = RepoBuilder::new();
        builder
            .branch(branch)
            .fetch_options(fetch_opts)
            .with_checkout(checkout);
        let repo = builder.clone(url, dir)?;

        info!("clone completed");
        Ok(GitStore {
            repo,
            repo_path: dir.to_path_buf(),
        })
    }

    fn open(&self, dir: &Path) -> Result<GitStore, StoreError> {
        debug!(path = %dir.display(), "opening git repository");
        let repo = Repository::open(dir)?;
        Ok(GitStore {
            repo,
            repo_path: dir.to_path_buf(),
        })
    }
}

/// Credential callbacks for one network operation. Gives up after a few
/// rejected attempts instead of looping on bad credentials.
fn remote_callbacks(creds: &Credentials) -> RemoteCallbacks<'static> {
    let username = creds.username.clone();
    let password = creds.password.clone();
    let mut attempts = 0;

    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username_from_url, allowed| {
        attempts += 1;
        if attempts > MAX_AUTH_ATTEMPTS {
            return Err(git2::Error::new(
                ErrorCode::Auth,
                ErrorClass::Http,
                "authentication failed: credentials rejected",
            ));
        }
        match password {
            Some(ref pw) if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) => {
                Cred::userpass_plaintext(&username, pw)
            }
            _ => Cred::default(),
        }
    });
    callbacks
}

fn to_object_id(oid: Oid) -> ObjectId {
    ObjectId::new(oid.to_string())
}

fn to_oid(oid: &ObjectId) -> Result<Oid, StoreError> {
    Oid::from_str(oid.as_str()).map_err(|_| StoreError::ObjectNotFound(oid.to_string()))
}

fn ref_not_found(name: &str) -> impl Fn(git2::Error) -> StoreError + '_ {
    move |e| match e.code() {
        ErrorCode::NotFound | ErrorCode::UnbornBranch => StoreError::RefNotFound(name.to_string()),
        _ => StoreError::from(e),
    }
}

fn index_entry(path: &str, id: Oid, mode: u32) -> IndexEntry {
    IndexEntry {
        ctime: IndexTime::new(0, 0),
        mtime: IndexTime::new(0, 0),
        dev: 0,
        ino: 0,
        mode,
        uid: 0,
        gid: 0,
        file_size: 0,
        id,
        flags: 0,
        flags_extended: 0,
        path: path.as_bytes().to_vec(),
    }
}

impl GitStore {
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn convert(&self, object: &git2::Object<'_>) -> Result<GitObject, StoreError> {
        let oid = object.id();
        match object.kind() {
            Some(ObjectType::Commit) => {
                let commit = object
                    .as_commit()
                    .ok_or_else(|| StoreError::Codec(format!("{oid} is not a commit")))?;
                let author = commit.author();
                Ok(GitObject::Commit(CommitObject {
                    tree: to_object_id(commit.tree_id()),
                    parents: commit.parent_ids().map(to_object_id).collect(),
                    author: Signature::new(
                        author.name().unwrap_or(""),
                        author.email().unwrap_or(""),
                        author.when().seconds(),
                    ),
                    message: commit.message().unwrap_or("").to_string(),
                }))
            }
            Some(ObjectType::Tree) => {
                let tree = object
                    .as_tree()
                    .ok_or_else(|| StoreError::Codec(format!("{oid} is not a tree")))?;
                let entries = tree
                    .iter()
                    .filter_map(|entry| {
                        // Submodule links point at foreign commits.
                        let kind = match entry.kind() {
                            Some(ObjectType::Tree) => EntryKind::Tree,
                            Some(ObjectType::Blob) => EntryKind::Blob,
                            _ => return None,
                        };
                        Some(TreeEntry {
                            name: entry.name().unwrap_or("").to_string(),
                            kind,
                            oid: to_object_id(entry.id()),
                            mode: entry.filemode() as u32,
                        })
                    })
                    .collect();
                Ok(GitObject::Tree(entries))
            }
            Some(ObjectType::Blob) => {
                let blob = object
                    .as_blob()
                    .ok_or_else(|| StoreError::Codec(format!("{oid} is not a blob")))?;
                Ok(GitObject::Blob(blob.content().to_vec()))
            }
            other => Err(StoreError::Codec(format!(
                "unsupported object type {:?} for {oid}",
                other
            ))),
        }
    }

    fn branch_tree(&self, branch: &str) -> Result<git2::Tree<'_>, StoreError> {
        let name = local_ref(branch);
        let reference = self.repo.find_reference(&name).map_err(ref_not_found(&name))?;
        Ok(reference.peel_to_commit()?.tree()?)
    }
}

impl ObjectStore for GitStore {
    #[instrument(skip(self, creds))]
    fn fetch(&mut self, branch: &str, single: bool, creds: &Credentials) -> Result<(), StoreError> {
        info!("fetching");
        let mut remote = self
            .repo
            .find_remote(REMOTE_NAME)
            .map_err(|_| StoreError::NoRemote)?;

        let refspec = if single {
            format!("+refs/heads/{0}:refs/remotes/{1}/{0}", branch, REMOTE_NAME)
        } else {
            format!("+refs/heads/*:refs/remotes/{}/*", REMOTE_NAME)
        };

        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks(creds));
        // Branch deletion is detected and handled by the caller.
        fetch_opts.prune(FetchPrune::Off);
        remote.fetch(&[refspec.as_str()], Some(&mut fetch_opts), None)?;

        debug!("fetch completed");
        Ok(())
    }

    #[instrument(skip(self, creds))]
    fn push(&mut self, branch: &str, force: bool, creds: &Credentials) -> Result<(), StoreError> {
        info!("pushing");
        let mut remote = self
            .repo
            .find_remote(REMOTE_NAME)
            .map_err(|_| StoreError::NoRemote)?;

        let mut callbacks = remote_callbacks(creds);
        let push_error = Arc::new(Mutex::new(None::<String>));
        let push_error_clone = push_error.clone();
        callbacks.push_update_reference(move |refname, status| {
            if let Some(msg) = status {
                warn!(refname, msg, "push rejected");
                *push_error_clone
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(msg.to_string());
            }
            Ok(())
        });

        let mut push_opts = PushOptions::new();
        push_opts.remote_callbacks(callbacks);
        let refspec = format!(
            "{}refs/heads/{1}:refs/heads/{1}",
            if force { "+" } else { "" },
            branch
        );
        remote
            .push(&[refspec.as_str()], Some(&mut push_opts))
            .map_err(|e| match StoreError::from(e) {
                StoreError::PushRejected { detail, .. } => StoreError::PushRejected {
                    branch: branch.to_string(),
                    detail,
                },
                other => other,
            })?;

        let rejected = push_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(detail) = rejected {
            return Err(StoreError::PushRejected {
                branch: branch.to_string(),
                detail,
            });
        }

        info!("push completed");
        Ok(())
    }

    fn read_object(&self, oid: &ObjectId) -> Result<GitObject, StoreError> {
        let object = self
            .repo
            .find_object(to_oid(oid)?, None)
            .map_err(|e| match e.code() {
                ErrorCode::NotFound => StoreError::ObjectNotFound(oid.to_string()),
                _ => StoreError::from(e),
            })?;
        self.convert(&object)
    }

    fn read_path(
        &self,
        commit: &ObjectId,
        path: &str,
    ) -> Result<(ObjectId, GitObject), StoreError> {
        let commit_obj = self
            .repo
            .find_commit(to_oid(commit)?)
            .map_err(|e| match e.code() {
                ErrorCode::NotFound => StoreError::ObjectNotFound(commit.to_string()),
                _ => StoreError::from(e),
            })?;
        let tree = commit_obj.tree()?;
        let entry = tree.get_path(Path::new(path)).map_err(|e| match e.code() {
            ErrorCode::NotFound => StoreError::PathNotFound {
                commit: commit.to_string(),
                path: path.to_string(),
            },
            _ => StoreError::from(e),
        })?;
        let object = entry.to_object(&self.repo)?;
        Ok((to_object_id(entry.id()), self.convert(&object)?))
    }

    fn write_object(&mut self, object: &GitObject) -> Result<ObjectId, StoreError> {
        let oid = match object {
            GitObject::Blob(bytes) => self.repo.blob(bytes)?,
            GitObject::Tree(entries) => {
                let mut builder = self.repo.treebuilder(None)?;
                for entry in entries {
                    builder.insert(&entry.name, to_oid(&entry.oid)?, entry.mode as i32)?;
                }
                builder.write()?
            }
            GitObject::Commit(commit) => {
                let tree = self.repo.find_tree(to_oid(&commit.tree)?)?;
                let parents = commit
                    .parents
                    .iter()
                    .map(|p| Ok(self.repo.find_commit(to_oid(p)?)?))
                    .collect::<Result<Vec<_>, StoreError>>()?;
                let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
                let sig = git2::Signature::new(
                    &commit.author.name,
                    &commit.author.email,
                    &Time::new(commit.author.time, 0),
                )?;
                self.repo
                    .commit(None, &sig, &sig, &commit.message, &tree, &parent_refs)?
            }
        };
        debug!(kind = object.kind_name(), oid = %oid, "wrote object");
        Ok(to_object_id(oid))
    }

    fn read_ref(&self, name: &str) -> Result<ObjectId, StoreError> {
        let oid = self.repo.refname_to_id(name).map_err(ref_not_found(name))?;
        Ok(to_object_id(oid))
    }

    fn write_ref(&mut self, name: &str, oid: &ObjectId, force: bool) -> Result<(), StoreError> {
        self.repo
            .reference(name, to_oid(oid)?, force, "confdraft: update ref")?;
        debug!(name, oid = %oid, "wrote ref");
        Ok(())
    }

    fn write_symbolic_ref(&mut self, name: &str, target: &str) -> Result<(), StoreError> {
        self.repo
            .reference_symbolic(name, target, true, "confdraft: update symbolic ref")?;
        Ok(())
    }

    fn current_branch(&self) -> Result<Option<String>, StoreError> {
        let head = self.repo.find_reference(HEAD).map_err(ref_not_found(HEAD))?;
        Ok(head
            .symbolic_target()
            .and_then(crate::git::refs::branch_of_local)
            .map(str::to_string))
    }

    fn delete_ref(&mut self, name: &str) -> Result<(), StoreError> {
        match self.repo.find_reference(name) {
            Ok(mut reference) => {
                reference.delete()?;
                debug!(name, "deleted ref");
                Ok(())
            }
            Err(e) if e.code() == ErrorCode::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_branches(&self, remote: Option<&str>) -> Result<Vec<String>, StoreError> {
        let (kind, prefix) = match remote {
            Some(r) => (BranchType::Remote, format!("{r}/")),
            None => (BranchType::Local, String::new()),
        };
        let mut names = Vec::new();
        for branch_result in self.repo.branches(Some(kind))? {
            let (branch, _) = branch_result?;
            if let Some(name) = branch.name()? {
                if let Some(short) = name.strip_prefix(prefix.as_str()) {
                    names.push(short.to_string());
                }
            }
        }
        Ok(names)
    }

    fn list_files(&self, branch: &str) -> Result<Vec<String>, StoreError> {
        let tree = self.branch_tree(branch)?;
        let mut files = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                files.push(format!("{}{}", root, entry.name().unwrap_or("")));
            }
            TreeWalkResult::Ok
        })?;
        Ok(files)
    }

    fn reset_index_entry(&mut self, path: &str, branch: &str) -> Result<(), StoreError> {
        let tree = self.branch_tree(branch)?;
        let entry = tree.get_path(Path::new(path)).map_err(|e| match e.code() {
            ErrorCode::NotFound => StoreError::PathNotFound {
                commit: local_ref(branch),
                path: path.to_string(),
            },
            _ => StoreError::from(e),
        })?;
        let mut index = self.repo.index()?;
        index.add(&index_entry(path, entry.id(), entry.filemode() as u32))?;
        index.write()?;
        Ok(())
    }

    #[instrument(skip(self, creds))]
    fn remote_refs(
        &mut self,
        creds: &Credentials,
    ) -> Result<BTreeMap<String, ObjectId>, StoreError> {
        let mut remote = self
            .repo
            .find_remote(REMOTE_NAME)
            .map_err(|_| StoreError::NoRemote)?;
        let connection =
            remote.connect_auth(Direction::Fetch, Some(remote_callbacks(creds)), None)?;
        let refs = connection
            .list()?
            .iter()
            .map(|head| (head.name().to_string(), to_object_id(head.oid())))
            .collect::<BTreeMap<_, _>>();
        debug!(count = refs.len(), "listed remote refs");
        Ok(refs)
    }

    fn clean_workdir(&mut self) -> Result<(), StoreError> {
        if let Some(workdir) = self.repo.workdir() {
            for entry in std::fs::read_dir(workdir)? {
                let entry = entry?;
                if entry.file_name() == ".git" {
                    continue;
                }
                if entry.file_type()?.is_dir() {
                    std::fs::remove_dir_all(entry.path())?;
                } else {
                    std::fs::remove_file(entry.path())?;
                }
            }
        }
        let mut index = self.repo.index()?;
        index.clear()?;
        index.write()?;
        Ok(())
    }

    fn stage(&mut self, path: &str, bytes: &[u8]) -> Result<ObjectId, StoreError> {
        let mut index = self.repo.index()?;
        index.add_frombuffer(&index_entry(path, Oid::zero(), BLOB_MODE), bytes)?;
        index.write()?;
        let oid = index
            .get_path(Path::new(path), 0)
            .map(|entry| to_object_id(entry.id))
            .ok_or_else(|| StoreError::PathNotFound {
                commit: "index".into(),
                path: path.to_string(),
            })?;
        debug!(path, oid = %oid, "staged file");
        Ok(oid)
    }

    fn remove(&mut self, path: &str) -> Result<(), StoreError> {
        let mut index = self.repo.index()?;
        index.remove_path(Path::new(path))?;
        index.write()?;
        debug!(path, "removed file from index");
        Ok(())
    }

    #[instrument(skip(self, message, author))]
    fn commit(
        &mut self,
        branch: &str,
        message: &str,
        author: &Signature,
    ) -> Result<ObjectId, StoreError> {
        let mut index = self.repo.index()?;
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;

        let refname = local_ref(branch);
        let parent = match self.repo.refname_to_id(&refname) {
            Ok(id) => Some(self.repo.find_commit(id)?),
            Err(e) if e.code() == ErrorCode::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let sig = git2::Signature::new(&author.name, &author.email, &Time::new(author.time, 0))?;
        let oid = self
            .repo
            .commit(Some(&refname), &sig, &sig, message, &tree, &parents)?;
        info!(sha = %oid, "created commit");
        Ok(to_object_id(oid))
    }

    fn index_entries(&self) -> Result<BTreeMap<String, ObjectId>, StoreError> {
        let index = self.repo.index()?;
        Ok(index
            .iter()
            .map(|entry| {
                (
                    String::from_utf8_lossy(&entry.path).into_owned(),
                    to_object_id(entry.id),
                )
            })
            .collect())
    }
}
