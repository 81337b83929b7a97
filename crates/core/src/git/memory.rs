//! In-process remote and clone, for tests and embedding.
//!
//! [`MemoryRemote`] plays the server: it owns branches and an object
//! database, and can be told to reject credentials, pushes or users.
//! [`MemoryStore`] is a clone of it that honours the clone depth, so
//! ancestors beyond the shallow boundary are really missing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::errors::StoreError;
use crate::git::refs::{branch_of_local, local_ref, remote_ref, HEAD, REMOTE_NAME};
use crate::git::store::{
    CommitObject, Credentials, EntryKind, GitObject, ObjectStore, Signature, StoreBackend,
    TreeEntry,
};
use crate::models::ObjectId;

const BLOB_MODE: u32 = 0o100644;
const TREE_MODE: u32 = 0o040000;

type Objects = HashMap<ObjectId, GitObject>;

/// Content address of an object.
pub fn hash_object(object: &GitObject) -> Result<ObjectId, StoreError> {
    let encoded = serde_json::to_vec(object).map_err(|e| StoreError::Codec(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(object.kind_name().as_bytes());
    hasher.update([0u8]);
    hasher.update(&encoded);
    Ok(ObjectId::new(hex::encode(hasher.finalize())))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Object graph helpers
// ---------------------------------------------------------------------------

fn insert(objects: &mut Objects, object: GitObject) -> Result<ObjectId, StoreError> {
    let oid = hash_object(&object)?;
    objects.entry(oid.clone()).or_insert(object);
    Ok(oid)
}

fn get<'a>(objects: &'a Objects, oid: &ObjectId) -> Result<&'a GitObject, StoreError> {
    objects
        .get(oid)
        .ok_or_else(|| StoreError::ObjectNotFound(oid.to_string()))
}

fn commit_of<'a>(objects: &'a Objects, oid: &ObjectId) -> Result<&'a CommitObject, StoreError> {
    match get(objects, oid)? {
        GitObject::Commit(c) => Ok(c),
        _ => Err(StoreError::UnexpectedKind {
            oid: oid.to_string(),
            expected: "commit",
        }),
    }
}

fn tree_of<'a>(objects: &'a Objects, oid: &ObjectId) -> Result<&'a [TreeEntry], StoreError> {
    match get(objects, oid)? {
        GitObject::Tree(entries) => Ok(entries),
        _ => Err(StoreError::UnexpectedKind {
            oid: oid.to_string(),
            expected: "tree",
        }),
    }
}

/// Copy a tree and everything below it.
fn copy_tree(src: &Objects, dst: &mut Objects, root: &ObjectId) -> Result<(), StoreError> {
    let mut stack = vec![root.clone()];
    while let Some(oid) = stack.pop() {
        if dst.contains_key(&oid) {
            continue;
        }
        let object = get(src, &oid)?.clone();
        if let GitObject::Tree(ref entries) = object {
            stack.extend(entries.iter().map(|e| e.oid.clone()));
        }
        dst.insert(oid, object);
    }
    Ok(())
}

/// Copy the history of `tip` from `src` to `dst`, stopping at commits `dst`
/// already holds and, when `depth > 0`, after `depth` generations.
fn copy_history(
    src: &Objects,
    dst: &mut Objects,
    tip: &ObjectId,
    depth: u32,
) -> Result<usize, StoreError> {
    let mut copied = 0;
    let mut stack = vec![(tip.clone(), 0u32)];
    let mut visited = HashSet::new();
    while let Some((oid, level)) = stack.pop() {
        if (depth > 0 && level >= depth) || dst.contains_key(&oid) || !visited.insert(oid.clone())
        {
            continue;
        }
        // A source clone may itself be shallow.
        let commit = match src.get(&oid) {
            Some(GitObject::Commit(c)) => c.clone(),
            _ => continue,
        };
        copy_tree(src, dst, &commit.tree)?;
        stack.extend(commit.parents.iter().map(|p| (p.clone(), level + 1)));
        dst.insert(oid, GitObject::Commit(commit));
        copied += 1;
    }
    Ok(copied)
}

/// Whether `ancestor` is reachable from `tip` through held objects.
fn is_ancestor(objects: &Objects, ancestor: &ObjectId, tip: &ObjectId) -> bool {
    let mut stack = vec![tip.clone()];
    let mut visited = HashSet::new();
    while let Some(oid) = stack.pop() {
        if &oid == ancestor {
            return true;
        }
        if !visited.insert(oid.clone()) {
            continue;
        }
        if let Some(GitObject::Commit(c)) = objects.get(&oid) {
            stack.extend(c.parents.iter().cloned());
        }
    }
    false
}

/// Every blob below `tree`, by path.
fn flatten_tree(
    objects: &Objects,
    tree: &ObjectId,
) -> Result<BTreeMap<String, ObjectId>, StoreError> {
    let mut files = BTreeMap::new();
    let mut stack = vec![(String::new(), tree.clone())];
    while let Some((prefix, oid)) = stack.pop() {
        for entry in tree_of(objects, &oid)? {
            let path = format!("{}{}", prefix, entry.name);
            match entry.kind {
                EntryKind::Blob => {
                    files.insert(path, entry.oid.clone());
                }
                EntryKind::Tree => stack.push((format!("{path}/"), entry.oid.clone())),
            }
        }
    }
    Ok(files)
}

/// Write nested trees for a flat path map; returns the root tree oid.
fn build_tree(
    objects: &mut Objects,
    files: &BTreeMap<String, ObjectId>,
) -> Result<ObjectId, StoreError> {
    let mut blobs = Vec::new();
    let mut dirs: BTreeMap<&str, BTreeMap<String, ObjectId>> = BTreeMap::new();
    for (path, oid) in files {
        match path.split_once('/') {
            Some((dir, rest)) => {
                dirs.entry(dir)
                    .or_default()
                    .insert(rest.to_string(), oid.clone());
            }
            None => blobs.push(TreeEntry {
                name: path.clone(),
                kind: EntryKind::Blob,
                oid: oid.clone(),
                mode: BLOB_MODE,
            }),
        }
    }
    let mut entries = blobs;
    for (dir, children) in dirs {
        let oid = build_tree(objects, &children)?;
        entries.push(TreeEntry {
            name: dir.to_string(),
            kind: EntryKind::Tree,
            oid,
            mode: TREE_MODE,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    insert(objects, GitObject::Tree(entries))
}

// ---------------------------------------------------------------------------
// Remote
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RemoteState {
    objects: Objects,
    branches: BTreeMap<String, ObjectId>,
    head: Option<String>,
    password: Option<String>,
    push_denied: HashSet<String>,
    failing_pushes: usize,
    racing_commit: Option<PendingCommit>,
    clones: HashMap<PathBuf, Arc<Mutex<LocalState>>>,
}

impl RemoteState {
    fn authorize(&self, creds: &Credentials) -> Result<(), StoreError> {
        match self.password {
            Some(ref expected) if creds.password.as_ref() != Some(expected) => {
                warn!(username = %creds.username, "memory remote rejected credentials");
                Err(StoreError::Auth(format!(
                    "invalid credentials for '{}'",
                    creds.username
                )))
            }
            _ => Ok(()),
        }
    }

    fn apply_commit(
        &mut self,
        branch: &str,
        changes: &[(String, Option<String>)],
        message: &str,
    ) -> Result<ObjectId, StoreError> {
        let mut files = self.files_at(branch)?;
        for (path, content) in changes {
            match content {
                Some(text) => {
                    let oid = insert(&mut self.objects, GitObject::Blob(text.as_bytes().to_vec()))?;
                    files.insert(path.clone(), oid);
                }
                None => {
                    files.remove(path);
                }
            }
        }
        let tree = build_tree(&mut self.objects, &files)?;
        let parents = self.branches.get(branch).cloned().into_iter().collect();
        let tick = self.objects.len() as i64;
        let commit = GitObject::Commit(CommitObject {
            tree,
            parents,
            author: Signature::new("upstream", "upstream@example.com", 1_700_000_000 + tick),
            message: message.to_string(),
        });
        let oid = insert(&mut self.objects, commit)?;
        self.branches.insert(branch.to_string(), oid.clone());
        if self.head.is_none() {
            self.head = Some(branch.to_string());
        }
        debug!(branch, oid = %oid, "memory remote commit");
        Ok(oid)
    }

    fn files_at(&self, branch: &str) -> Result<BTreeMap<String, ObjectId>, StoreError> {
        match self.branches.get(branch) {
            Some(tip) => {
                let tree = commit_of(&self.objects, tip)?.tree.clone();
                flatten_tree(&self.objects, &tree)
            }
            None => Ok(BTreeMap::new()),
        }
    }
}

/// Upstream commit applied just before the next push is processed.
struct PendingCommit {
    branch: String,
    changes: Vec<(String, Option<String>)>,
    message: String,
}

fn owned_changes(changes: &[(&str, Option<&str>)]) -> Vec<(String, Option<String>)> {
    changes
        .iter()
        .map(|(path, content)| (path.to_string(), content.map(str::to_string)))
        .collect()
}

/// An in-process git server.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `password` on every network operation.
    pub fn with_password(self, password: &str) -> Self {
        lock(&self.state).password = Some(password.to_string());
        self
    }

    /// Commit `changes` on top of `branch` (creating it if needed).
    /// `None` content deletes the path.
    pub fn commit_to_branch(
        &self,
        branch: &str,
        changes: &[(&str, Option<&str>)],
        message: &str,
    ) -> Result<ObjectId, StoreError> {
        lock(&self.state).apply_commit(branch, &owned_changes(changes), message)
    }

    /// Land `changes` on `branch` right before the next push is checked,
    /// after any fetch the pushing client did.
    pub fn commit_before_next_push(
        &self,
        branch: &str,
        changes: &[(&str, Option<&str>)],
        message: &str,
    ) {
        lock(&self.state).racing_commit = Some(PendingCommit {
            branch: branch.to_string(),
            changes: owned_changes(changes),
            message: message.to_string(),
        });
    }

    /// Point a new branch at the tip of `from`.
    pub fn create_branch(&self, name: &str, from: &str) -> Result<ObjectId, StoreError> {
        let mut state = lock(&self.state);
        let tip = state
            .branches
            .get(from)
            .cloned()
            .ok_or_else(|| StoreError::RefNotFound(local_ref(from)))?;
        state.branches.insert(name.to_string(), tip.clone());
        Ok(tip)
    }

    pub fn delete_branch(&self, name: &str) {
        lock(&self.state).branches.remove(name);
    }

    pub fn branch_tip(&self, branch: &str) -> Option<ObjectId> {
        lock(&self.state).branches.get(branch).cloned()
    }

    pub fn branches(&self) -> Vec<String> {
        lock(&self.state).branches.keys().cloned().collect()
    }

    /// Blob oid of `path` at the tip of `branch`.
    pub fn blob_oid(&self, branch: &str, path: &str) -> Option<ObjectId> {
        lock(&self.state).files_at(branch).ok()?.remove(path)
    }

    pub fn read_file(&self, branch: &str, path: &str) -> Option<String> {
        let state = lock(&self.state);
        let oid = state.files_at(branch).ok()?.remove(path)?;
        match state.objects.get(&oid) {
            Some(GitObject::Blob(bytes)) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    /// The commit object at `oid`, if the remote holds it.
    pub fn commit(&self, oid: &ObjectId) -> Option<CommitObject> {
        commit_of(&lock(&self.state).objects, oid).ok().cloned()
    }

    /// Make the next `count` pushes fail with a network error.
    pub fn fail_next_pushes(&self, count: usize) {
        lock(&self.state).failing_pushes = count;
    }

    /// Refuse pushes from `username`.
    pub fn deny_push(&self, username: &str) {
        lock(&self.state).push_denied.insert(username.to_string());
    }
}

// ---------------------------------------------------------------------------
// Local clone
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum RefTarget {
    Direct(ObjectId),
    Symbolic(String),
}

#[derive(Default)]
struct LocalState {
    objects: Objects,
    refs: BTreeMap<String, RefTarget>,
    index: BTreeMap<String, ObjectId>,
}

impl LocalState {
    fn resolve(&self, name: &str) -> Result<ObjectId, StoreError> {
        let mut current = name.to_string();
        // Symbolic chains are at most HEAD -> branch in practice.
        for _ in 0..5 {
            match self.refs.get(&current) {
                Some(RefTarget::Direct(oid)) => return Ok(oid.clone()),
                Some(RefTarget::Symbolic(target)) => current = target.clone(),
                None => break,
            }
        }
        Err(StoreError::RefNotFound(name.to_string()))
    }

    fn branch_files(&self, branch: &str) -> Result<BTreeMap<String, ObjectId>, StoreError> {
        let tip = self.resolve(&local_ref(branch))?;
        let tree = commit_of(&self.objects, &tip)?.tree.clone();
        flatten_tree(&self.objects, &tree)
    }
}

/// A clone of a [`MemoryRemote`].
pub struct MemoryStore {
    dir: PathBuf,
    remote: MemoryRemote,
    local: Arc<Mutex<LocalState>>,
}

impl MemoryStore {
    /// A store with no remote history, for exercising object-level code.
    pub fn scratch() -> Self {
        Self {
            dir: PathBuf::new(),
            remote: MemoryRemote::new(),
            local: Arc::new(Mutex::new(LocalState::default())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl StoreBackend for MemoryRemote {
    type Store = MemoryStore;

    fn clone_shallow(
        &self,
        dir: &Path,
        url: &str,
        branch: &str,
        depth: u32,
        creds: &Credentials,
    ) -> Result<MemoryStore, StoreError> {
        info!(url, depth, path = %dir.display(), "cloning memory repository");
        let mut state = lock(&self.state);
        state.authorize(creds)?;
        let tip = state
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| {
                StoreError::RefNotFound(format!("couldn't find remote ref {}", local_ref(branch)))
            })?;

        let mut local = LocalState::default();
        for (name, oid) in &state.branches {
            copy_history(&state.objects, &mut local.objects, oid, depth)?;
            local
                .refs
                .insert(remote_ref(name), RefTarget::Direct(oid.clone()));
        }
        local
            .refs
            .insert(local_ref(branch), RefTarget::Direct(tip));
        local
            .refs
            .insert(HEAD.to_string(), RefTarget::Symbolic(local_ref(branch)));

        std::fs::create_dir_all(dir)?;
        let local = Arc::new(Mutex::new(local));
        state.clones.insert(dir.to_path_buf(), local.clone());
        Ok(MemoryStore {
            dir: dir.to_path_buf(),
            remote: self.clone(),
            local,
        })
    }

    fn open(&self, dir: &Path) -> Result<MemoryStore, StoreError> {
        let state = lock(&self.state);
        let local = match state.clones.get(dir) {
            Some(local) if dir.exists() => local.clone(),
            _ => {
                return Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no repository at {}", dir.display()),
                )))
            }
        };
        Ok(MemoryStore {
            dir: dir.to_path_buf(),
            remote: self.clone(),
            local,
        })
    }
}

impl ObjectStore for MemoryStore {
    fn fetch(&mut self, branch: &str, single: bool, creds: &Credentials) -> Result<(), StoreError> {
        let remote = lock(&self.remote.state);
        remote.authorize(creds)?;
        let mut local = lock(&self.local);

        let wanted: Vec<(String, ObjectId)> = if single {
            let tip = remote.branches.get(branch).cloned().ok_or_else(|| {
                StoreError::RefNotFound(format!("couldn't find remote ref {}", local_ref(branch)))
            })?;
            vec![(branch.to_string(), tip)]
        } else {
            remote
                .branches
                .iter()
                .map(|(name, oid)| (name.clone(), oid.clone()))
                .collect()
        };

        for (name, tip) in wanted {
            let copied = copy_history(&remote.objects, &mut local.objects, &tip, 0)?;
            debug!(branch = %name, copied, "fetched");
            local.refs.insert(remote_ref(&name), RefTarget::Direct(tip));
        }
        Ok(())
    }

    fn push(&mut self, branch: &str, force: bool, creds: &Credentials) -> Result<(), StoreError> {
        let mut remote = lock(&self.remote.state);
        remote.authorize(creds)?;
        if remote.push_denied.contains(&creds.username) {
            return Err(StoreError::Forbidden(format!(
                "'{}' may not push to this repository",
                creds.username
            )));
        }
        if remote.failing_pushes > 0 {
            remote.failing_pushes -= 1;
            return Err(StoreError::Network("connection reset during push".into()));
        }
        if let Some(pending) = remote.racing_commit.take() {
            remote.apply_commit(&pending.branch, &pending.changes, &pending.message)?;
        }

        let local = lock(&self.local);
        let tip = local.resolve(&local_ref(branch))?;
        if let Some(current) = remote.branches.get(branch) {
            if !force && current != &tip && !is_ancestor(&local.objects, current, &tip) {
                return Err(StoreError::PushRejected {
                    branch: branch.to_string(),
                    detail: "non-fast-forward update".into(),
                });
            }
        }
        let copied = copy_history(&local.objects, &mut remote.objects, &tip, 0)?;
        remote.branches.insert(branch.to_string(), tip.clone());
        info!(branch, tip = %tip, copied, "memory remote accepted push");
        Ok(())
    }

    fn read_object(&self, oid: &ObjectId) -> Result<GitObject, StoreError> {
        get(&lock(&self.local).objects, oid).cloned()
    }

    fn read_path(
        &self,
        commit: &ObjectId,
        path: &str,
    ) -> Result<(ObjectId, GitObject), StoreError> {
        let local = lock(&self.local);
        let not_found = || StoreError::PathNotFound {
            commit: commit.to_string(),
            path: path.to_string(),
        };
        let mut oid = commit_of(&local.objects, commit)?.tree.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let entry = tree_of(&local.objects, &oid)
                .map_err(|_| not_found())?
                .iter()
                .find(|e| e.name == segment)
                .ok_or_else(not_found)?;
            oid = entry.oid.clone();
        }
        let object = get(&local.objects, &oid)?.clone();
        Ok((oid, object))
    }

    fn write_object(&mut self, object: &GitObject) -> Result<ObjectId, StoreError> {
        insert(&mut lock(&self.local).objects, object.clone())
    }

    fn read_ref(&self, name: &str) -> Result<ObjectId, StoreError> {
        lock(&self.local).resolve(name)
    }

    fn write_ref(&mut self, name: &str, oid: &ObjectId, force: bool) -> Result<(), StoreError> {
        let mut local = lock(&self.local);
        if !force && local.refs.contains_key(name) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("ref {name} already exists"),
            )));
        }
        local
            .refs
            .insert(name.to_string(), RefTarget::Direct(oid.clone()));
        Ok(())
    }

    fn write_symbolic_ref(&mut self, name: &str, target: &str) -> Result<(), StoreError> {
        lock(&self.local)
            .refs
            .insert(name.to_string(), RefTarget::Symbolic(target.to_string()));
        Ok(())
    }

    fn current_branch(&self) -> Result<Option<String>, StoreError> {
        Ok(match lock(&self.local).refs.get(HEAD) {
            Some(RefTarget::Symbolic(target)) => branch_of_local(target).map(str::to_string),
            _ => None,
        })
    }

    fn delete_ref(&mut self, name: &str) -> Result<(), StoreError> {
        lock(&self.local).refs.remove(name);
        Ok(())
    }

    fn list_branches(&self, remote: Option<&str>) -> Result<Vec<String>, StoreError> {
        let prefix = match remote {
            Some(r) => format!("refs/remotes/{r}/"),
            None => "refs/heads/".to_string(),
        };
        Ok(lock(&self.local)
            .refs
            .keys()
            .filter_map(|name| name.strip_prefix(prefix.as_str()))
            .map(str::to_string)
            .collect())
    }

    fn list_files(&self, branch: &str) -> Result<Vec<String>, StoreError> {
        Ok(lock(&self.local).branch_files(branch)?.into_keys().collect())
    }

    fn reset_index_entry(&mut self, path: &str, branch: &str) -> Result<(), StoreError> {
        let mut local = lock(&self.local);
        let oid = local
            .branch_files(branch)?
            .remove(path)
            .ok_or_else(|| StoreError::PathNotFound {
                commit: local_ref(branch),
                path: path.to_string(),
            })?;
        local.index.insert(path.to_string(), oid);
        Ok(())
    }

    fn remote_refs(
        &mut self,
        creds: &Credentials,
    ) -> Result<BTreeMap<String, ObjectId>, StoreError> {
        let remote = lock(&self.remote.state);
        remote.authorize(creds)?;
        let mut refs: BTreeMap<String, ObjectId> = remote
            .branches
            .iter()
            .map(|(name, oid)| (local_ref(name), oid.clone()))
            .collect();
        if let Some(tip) = remote.head.as_ref().and_then(|h| remote.branches.get(h)) {
            refs.insert(HEAD.to_string(), tip.clone());
        }
        Ok(refs)
    }

    fn clean_workdir(&mut self) -> Result<(), StoreError> {
        if self.dir.is_dir() {
            for entry in std::fs::read_dir(&self.dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    std::fs::remove_dir_all(entry.path())?;
                } else {
                    std::fs::remove_file(entry.path())?;
                }
            }
        }
        lock(&self.local).index.clear();
        Ok(())
    }

    fn stage(&mut self, path: &str, bytes: &[u8]) -> Result<ObjectId, StoreError> {
        let mut local = lock(&self.local);
        let oid = insert(&mut local.objects, GitObject::Blob(bytes.to_vec()))?;
        local.index.insert(path.to_string(), oid.clone());
        Ok(oid)
    }

    fn remove(&mut self, path: &str) -> Result<(), StoreError> {
        lock(&self.local).index.remove(path);
        Ok(())
    }

    fn commit(
        &mut self,
        branch: &str,
        message: &str,
        author: &Signature,
    ) -> Result<ObjectId, StoreError> {
        let mut local = lock(&self.local);
        let index = local.index.clone();
        let tree = build_tree(&mut local.objects, &index)?;
        let refname = local_ref(branch);
        let parents = match local.resolve(&refname) {
            Ok(tip) => vec![tip],
            Err(StoreError::RefNotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        let oid = insert(
            &mut local.objects,
            GitObject::Commit(CommitObject {
                tree,
                parents,
                author: author.clone(),
                message: message.to_string(),
            }),
        )?;
        local.refs.insert(refname, RefTarget::Direct(oid.clone()));
        info!(branch, sha = %oid, "created commit");
        Ok(oid)
    }

    fn index_entries(&self) -> Result<BTreeMap<String, ObjectId>, StoreError> {
        Ok(lock(&self.local).index.clone())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("dir", &self.dir)
            .field("remote", &REMOTE_NAME)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            username: "alice".into(),
            password: Some("pw".into()),
        }
    }

    fn author() -> Signature {
        Signature::new("Alice", "alice@example.com", 1_700_000_000)
    }

    #[test]
    fn test_shallow_clone_omits_old_history() {
        let remote = MemoryRemote::new();
        let first = remote
            .commit_to_branch("master", &[("apps/app1/a.yaml", Some("v: 1\n"))], "one")
            .unwrap();
        let second = remote
            .commit_to_branch("master", &[("apps/app1/a.yaml", Some("v: 2\n"))], "two")
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let store = remote
            .clone_shallow(&dir.path().join("clone"), "memory://acme/conf", "master", 1, &creds())
            .unwrap();

        assert!(store.read_object(&second).is_ok());
        assert!(store.read_object(&first).unwrap_err().is_missing_object());
        assert_eq!(store.list_files("master").unwrap(), vec!["apps/app1/a.yaml"]);
    }

    #[test]
    fn test_wrong_password_is_auth_error() {
        let remote = MemoryRemote::new().with_password("secret");
        remote
            .commit_to_branch("master", &[("README.md", Some("hi"))], "init")
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let result = remote.clone_shallow(dir.path(), "memory://x", "master", 1, &creds());
        assert!(matches!(result, Err(StoreError::Auth(_))));
    }

    #[test]
    fn test_push_rejects_non_fast_forward() {
        let remote = MemoryRemote::new();
        remote
            .commit_to_branch("master", &[("README.md", Some("a"))], "init")
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut store = remote
            .clone_shallow(&dir.path().join("c"), "memory://x", "master", 0, &creds())
            .unwrap();

        remote
            .commit_to_branch("master", &[("README.md", Some("b"))], "upstream")
            .unwrap();

        store.reset_index_entry("README.md", "master").unwrap();
        store.stage("README.md", b"c").unwrap();
        store.commit("master", "local", &author()).unwrap();
        let result = store.push("master", false, &creds());
        assert!(matches!(result, Err(StoreError::PushRejected { .. })));

        store.push("master", true, &creds()).unwrap();
        assert_eq!(remote.read_file("master", "README.md").as_deref(), Some("c"));
    }

    #[test]
    fn test_fetch_missing_branch_is_ref_not_found() {
        let remote = MemoryRemote::new();
        remote
            .commit_to_branch("master", &[("README.md", Some("a"))], "init")
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut store = remote
            .clone_shallow(&dir.path().join("c"), "memory://x", "master", 0, &creds())
            .unwrap();
        let result = store.fetch("gone", true, &creds());
        assert!(matches!(result, Err(StoreError::RefNotFound(_))));
    }

    #[test]
    fn test_reopen_shares_state() {
        let remote = MemoryRemote::new();
        remote
            .commit_to_branch("master", &[("README.md", Some("a"))], "init")
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c");
        let mut store = remote
            .clone_shallow(&path, "memory://x", "master", 0, &creds())
            .unwrap();
        let tip = store.read_ref(&local_ref("master")).unwrap();
        store.write_ref(&local_ref("feature"), &tip, true).unwrap();

        let reopened = remote.open(&path).unwrap();
        assert_eq!(reopened.read_ref(&local_ref("feature")).unwrap(), tip);
        assert!(remote.open(&dir.path().join("other")).is_err());
    }

    #[test]
    fn test_build_and_flatten_tree() {
        let mut objects = Objects::new();
        let a = insert(&mut objects, GitObject::Blob(b"a".to_vec())).unwrap();
        let b = insert(&mut objects, GitObject::Blob(b"b".to_vec())).unwrap();
        let files = BTreeMap::from([
            ("apps/x/a.yaml".to_string(), a.clone()),
            ("README.md".to_string(), b.clone()),
        ]);
        let tree = build_tree(&mut objects, &files).unwrap();
        assert_eq!(flatten_tree(&objects, &tree).unwrap(), files);
    }
}
