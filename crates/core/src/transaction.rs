//! Commit-and-push with rollback.
//!
//! A transaction starts from a known commit, applies one mutation to the
//! branch, and pushes it. Either the remote accepted the new commit and both
//! the local head and the remote-tracking ref point at it, or the local head
//! is back at the starting commit with an index matching its tree.

use tracing::{debug, error, info, warn};

use crate::errors::{EngineError, StoreError};
use crate::git::refs::{local_ref, remote_ref};
use crate::git::{Credentials, ObjectStore};
use crate::models::ObjectId;

/// Empty the working directory and rebuild the index from the tree of
/// `refs/heads/<branch>`.
pub fn normalize_index<S: ObjectStore + ?Sized>(
    store: &mut S,
    branch: &str,
) -> Result<(), StoreError> {
    store.clean_workdir()?;
    let files = store.list_files(branch)?;
    for path in &files {
        store.reset_index_entry(path, branch)?;
    }
    debug!(branch, entries = files.len(), "index normalized");
    Ok(())
}

/// Run `mutation` on `branch` starting from `last_commit`, then push.
///
/// The mutation leaves `refs/heads/<branch>` at the commit it returns.
pub fn run_transaction<S, F>(
    store: &mut S,
    creds: &Credentials,
    branch: &str,
    last_commit: &ObjectId,
    force: bool,
    mutation: F,
) -> Result<ObjectId, EngineError>
where
    S: ObjectStore + ?Sized,
    F: FnOnce(&mut S) -> Result<ObjectId, EngineError>,
{
    let head = local_ref(branch);
    store.write_ref(&head, last_commit, true)?;
    normalize_index(store, branch)?;

    match apply_and_push(store, creds, branch, force, mutation) {
        Ok(oid) => {
            store.write_ref(&remote_ref(branch), &oid, true)?;
            store.write_ref(&head, &oid, true)?;
            normalize_index(store, branch)?;
            info!(branch, from = %last_commit.short(), to = %oid.short(), "transaction committed");
            Ok(oid)
        }
        Err(source) => {
            warn!(branch, error = %source, "transaction failed, rolling back");
            if let Err(e) = rollback(store, branch, last_commit) {
                error!(branch, error = %e, "rollback failed");
            }
            Err(EngineError::TransactionFailed {
                branch: branch.to_string(),
                source: Box::new(source),
            })
        }
    }
}

fn apply_and_push<S, F>(
    store: &mut S,
    creds: &Credentials,
    branch: &str,
    force: bool,
    mutation: F,
) -> Result<ObjectId, EngineError>
where
    S: ObjectStore + ?Sized,
    F: FnOnce(&mut S) -> Result<ObjectId, EngineError>,
{
    let oid = mutation(store)?;
    store
        .push(branch, force, creds)
        .map_err(EngineError::from_remote)?;
    Ok(oid)
}

fn rollback<S: ObjectStore + ?Sized>(
    store: &mut S,
    branch: &str,
    last_commit: &ObjectId,
) -> Result<(), StoreError> {
    store.write_ref(&local_ref(branch), last_commit, true)?;
    normalize_index(store, branch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorStatus;
    use crate::git::{MemoryRemote, MemoryStore, Signature, StoreBackend};
    use std::collections::BTreeMap;

    fn setup() -> (tempfile::TempDir, MemoryRemote, MemoryStore, ObjectId) {
        let remote = MemoryRemote::new();
        remote
            .commit_to_branch("master", &[("apps/app1/a.yaml", Some("a: 1"))], "seed")
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = remote
            .clone_shallow(dir.path(), "memory://conf", "master", 1, &Credentials::default())
            .unwrap();
        let tip = store.read_ref(&remote_ref("master")).unwrap();
        (dir, remote, store, tip)
    }

    fn add_file(store: &mut MemoryStore) -> Result<ObjectId, EngineError> {
        store.stage("apps/app1/b.yaml", b"b: 2")?;
        Ok(store.commit("master", "Add b", &Signature::new("t", "t@example.com", 1))?)
    }

    fn head_tree(store: &MemoryStore) -> BTreeMap<String, ObjectId> {
        store
            .list_files("master")
            .unwrap()
            .into_iter()
            .map(|p| {
                let tip = store.read_ref(&local_ref("master")).unwrap();
                let (oid, _) = store.read_path(&tip, &p).unwrap();
                (p, oid)
            })
            .collect()
    }

    #[test]
    fn test_successful_transaction_updates_both_refs() {
        let (_dir, remote, mut store, tip) = setup();
        let creds = Credentials::default();

        let oid = run_transaction(&mut store, &creds, "master", &tip, false, add_file).unwrap();

        assert_eq!(store.read_ref(&local_ref("master")).unwrap(), oid);
        assert_eq!(store.read_ref(&remote_ref("master")).unwrap(), oid);
        assert_eq!(remote.branch_tip("master"), Some(oid));
        assert_eq!(remote.read_file("master", "apps/app1/b.yaml").as_deref(), Some("b: 2"));
        assert_eq!(store.index_entries().unwrap(), head_tree(&store));
    }

    #[test]
    fn test_failed_push_rolls_back() {
        let (_dir, remote, mut store, tip) = setup();
        remote.fail_next_pushes(1);

        let creds = Credentials::default();
        let err = run_transaction(&mut store, &creds, "master", &tip, false, add_file).unwrap_err();

        assert!(matches!(
            err,
            EngineError::TransactionFailed { ref branch, .. } if branch == "master"
        ));
        assert_eq!(store.read_ref(&local_ref("master")).unwrap(), tip);
        assert_eq!(store.read_ref(&remote_ref("master")).unwrap(), tip);
        assert_eq!(store.index_entries().unwrap(), head_tree(&store));
        assert!(!store.index_entries().unwrap().contains_key("apps/app1/b.yaml"));
        assert_eq!(remote.branch_tip("master"), Some(tip));
    }

    #[test]
    fn test_failed_mutation_rolls_back() {
        let (_dir, _remote, mut store, tip) = setup();
        let err = run_transaction(&mut store, &Credentials::default(), "master", &tip, false, |s| {
            add_file(s)?;
            Err(EngineError::NotFound("apps/app1/c.yaml".into()))
        })
        .unwrap_err();

        assert_eq!(err.status(), ErrorStatus::NotFound);
        assert_eq!(store.read_ref(&local_ref("master")).unwrap(), tip);
    }

    #[test]
    fn test_rejected_push_reports_conflict() {
        let (_dir, remote, mut store, tip) = setup();
        remote
            .commit_to_branch("master", &[("apps/app1/a.yaml", Some("a: 2"))], "concurrent")
            .unwrap();

        let creds = Credentials::default();
        let err = run_transaction(&mut store, &creds, "master", &tip, false, add_file).unwrap_err();
        assert_eq!(err.status(), ErrorStatus::Conflict);
        assert_eq!(store.read_ref(&local_ref("master")).unwrap(), tip);
    }

    #[test]
    fn test_denied_push_reports_forbidden() {
        let (_dir, remote, mut store, tip) = setup();
        remote.deny_push("bob");
        let creds = Credentials {
            username: "bob".into(),
            password: None,
        };
        let err = run_transaction(&mut store, &creds, "master", &tip, false, add_file).unwrap_err();
        assert_eq!(err.status(), ErrorStatus::Forbidden);
    }
}
