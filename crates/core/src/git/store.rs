//! The object-store seam between the engine and a concrete git backend.
//!
//! Everything above this module reads commits, trees and blobs by oid and
//! manipulates refs by name; it never touches a working tree. A store is a
//! local (possibly shallow) clone bound to exactly one remote, `origin`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::models::ObjectId;

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// Author / committer identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// Seconds since the Unix epoch.
    pub time: i64,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, time: i64) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            time,
        }
    }

    pub fn now(name: &str, email: &str) -> Self {
        Self::new(name, email, chrono::Utc::now().timestamp())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Blob,
    Tree,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub kind: EntryKind,
    pub oid: ObjectId,
    pub mode: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitObject {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitObject {
    Commit(CommitObject),
    Tree(Vec<TreeEntry>),
    Blob(Vec<u8>),
}

impl GitObject {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Commit(_) => "commit",
            Self::Tree(_) => "tree",
            Self::Blob(_) => "blob",
        }
    }

    pub fn into_commit(self, oid: &ObjectId) -> Result<CommitObject, StoreError> {
        match self {
            Self::Commit(c) => Ok(c),
            _ => Err(unexpected(oid, "commit")),
        }
    }

    pub fn into_tree(self, oid: &ObjectId) -> Result<Vec<TreeEntry>, StoreError> {
        match self {
            Self::Tree(entries) => Ok(entries),
            _ => Err(unexpected(oid, "tree")),
        }
    }

    pub fn into_blob(self, oid: &ObjectId) -> Result<Vec<u8>, StoreError> {
        match self {
            Self::Blob(bytes) => Ok(bytes),
            _ => Err(unexpected(oid, "blob")),
        }
    }
}

fn unexpected(oid: &ObjectId, expected: &'static str) -> StoreError {
    StoreError::UnexpectedKind {
        oid: oid.to_string(),
        expected,
    }
}

/// Credentials presented to the remote.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Primitive operations on a local clone.
///
/// Ref names are full (`refs/heads/x`, `refs/remotes/origin/x`, `HEAD`).
/// Paths are repository-relative with `/` separators.
pub trait ObjectStore: Send {
    /// Fetch `branch` (or every branch unless `single`) into
    /// `refs/remotes/origin/*`. Local heads are left untouched.
    fn fetch(&mut self, branch: &str, single: bool, creds: &Credentials)
        -> Result<(), StoreError>;

    /// Push `refs/heads/<branch>` to the remote branch of the same name.
    fn push(&mut self, branch: &str, force: bool, creds: &Credentials) -> Result<(), StoreError>;

    /// Read an object held locally. Missing objects are
    /// [`StoreError::ObjectNotFound`].
    fn read_object(&self, oid: &ObjectId) -> Result<GitObject, StoreError>;

    /// Read the object at `path` in `commit`'s tree, with its oid.
    fn read_path(&self, commit: &ObjectId, path: &str) -> Result<(ObjectId, GitObject), StoreError>;

    fn write_object(&mut self, object: &GitObject) -> Result<ObjectId, StoreError>;

    /// Resolve a ref (following symbolic refs) to a commit oid.
    fn read_ref(&self, name: &str) -> Result<ObjectId, StoreError>;

    fn write_ref(&mut self, name: &str, oid: &ObjectId, force: bool) -> Result<(), StoreError>;

    fn write_symbolic_ref(&mut self, name: &str, target: &str) -> Result<(), StoreError>;

    /// Short name of the branch `HEAD` points at, if any.
    fn current_branch(&self) -> Result<Option<String>, StoreError>;

    /// Delete a ref; deleting a missing ref is not an error.
    fn delete_ref(&mut self, name: &str) -> Result<(), StoreError>;

    /// Local branch names, or the remote-tracking names of `remote`.
    fn list_branches(&self, remote: Option<&str>) -> Result<Vec<String>, StoreError>;

    /// Every blob path in the tree of `refs/heads/<branch>`.
    fn list_files(&self, branch: &str) -> Result<Vec<String>, StoreError>;

    /// Set the index entry of `path` to its blob in `refs/heads/<branch>`.
    fn reset_index_entry(&mut self, path: &str, branch: &str) -> Result<(), StoreError>;

    /// Refs advertised by the remote, by full name (plus `HEAD`).
    fn remote_refs(
        &mut self,
        creds: &Credentials,
    ) -> Result<BTreeMap<String, ObjectId>, StoreError>;

    /// Remove every working-directory file except the object-store
    /// directory, and empty the index.
    fn clean_workdir(&mut self) -> Result<(), StoreError>;

    /// Write `bytes` as a blob and stage it at `path`; returns the blob oid.
    fn stage(&mut self, path: &str, bytes: &[u8]) -> Result<ObjectId, StoreError>;

    /// Unstage `path`.
    fn remove(&mut self, path: &str) -> Result<(), StoreError>;

    /// Commit the index on top of `refs/heads/<branch>` and advance it.
    fn commit(&mut self, branch: &str, message: &str, author: &Signature)
        -> Result<ObjectId, StoreError>;

    /// Current index content, path to blob oid.
    fn index_entries(&self) -> Result<BTreeMap<String, ObjectId>, StoreError>;
}

/// Creates and reopens local clones.
pub trait StoreBackend {
    type Store: ObjectStore;

    /// Clone `url` into `dir` without a checkout, `depth` commits deep
    /// (0 for full history), with `branch` as `HEAD`.
    fn clone_shallow(
        &self,
        dir: &Path,
        url: &str,
        branch: &str,
        depth: u32,
        creds: &Credentials,
    ) -> Result<Self::Store, StoreError>;

    fn open(&self, dir: &Path) -> Result<Self::Store, StoreError>;
}
