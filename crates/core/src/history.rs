//! Merge-base discovery over possibly shallow history.
//!
//! Both commits are walked depth-first with explicit stacks, one step per
//! side in turn (target first). Merge commits are followed through their
//! second parent first, since that is the tip that was merged in. Commits
//! beyond the shallow boundary are dead ends, so the walk is bounded by
//! what the clone actually holds.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::errors::StoreError;
use crate::git::ObjectStore;
use crate::models::ObjectId;

struct Side {
    /// Every commit known to be an ancestor, in discovery order.
    ancestors: Vec<ObjectId>,
    seen: HashSet<ObjectId>,
    stack: Vec<ObjectId>,
    expanded: HashSet<ObjectId>,
}

impl Side {
    fn new(seed: &ObjectId) -> Self {
        Self {
            ancestors: vec![seed.clone()],
            seen: HashSet::from([seed.clone()]),
            stack: vec![seed.clone()],
            expanded: HashSet::new(),
        }
    }

    fn next(&mut self) -> Option<ObjectId> {
        while let Some(oid) = self.stack.pop() {
            if self.expanded.insert(oid.clone()) {
                return Some(oid);
            }
        }
        None
    }
}

/// Parents of `oid` in visiting order, or `None` when the commit is not
/// held locally.
fn parents_of<S: ObjectStore + ?Sized>(
    store: &S,
    oid: &ObjectId,
) -> Result<Option<Vec<ObjectId>>, StoreError> {
    match store.read_object(oid) {
        Ok(object) => {
            let mut parents = object.into_commit(oid)?.parents;
            parents.reverse();
            Ok(Some(parents))
        }
        Err(e) if e.is_missing_object() => {
            debug!(commit = %oid, "history ends at shallow boundary");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Nearest common ancestor of `src` and `target` discoverable locally.
pub fn find_merge_base<S: ObjectStore + ?Sized>(
    store: &S,
    src: &ObjectId,
    target: &ObjectId,
) -> Result<Option<ObjectId>, StoreError> {
    if src == target {
        return Ok(Some(src.clone()));
    }

    // Index 0 walks the target, index 1 the source.
    let mut sides = [Side::new(target), Side::new(src)];
    let mut turn = 0;

    loop {
        if sides[0].stack.is_empty() && sides[1].stack.is_empty() {
            info!(src = %src, target = %target, "no merge base found");
            return Ok(None);
        }

        let (this, other) = match turn {
            0 => {
                let (a, b) = sides.split_at_mut(1);
                (&mut a[0], &b[0])
            }
            _ => {
                let (a, b) = sides.split_at_mut(1);
                (&mut b[0], &a[0])
            }
        };
        turn = 1 - turn;

        let Some(oid) = this.next() else {
            continue;
        };
        let Some(parents) = parents_of(store, &oid)? else {
            continue;
        };

        for parent in &parents {
            if this.seen.insert(parent.clone()) {
                this.ancestors.push(parent.clone());
                if other.seen.contains(parent) {
                    info!(
                        src = %src,
                        target = %target,
                        base = %parent,
                        walked = this.ancestors.len() + other.ancestors.len(),
                        "found merge base"
                    );
                    return Ok(Some(parent.clone()));
                }
            }
        }
        // Push in reverse so the first parent in visiting order pops first.
        this.stack.extend(parents.into_iter().rev());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{CommitObject, GitObject, MemoryStore, Signature};

    struct Graph {
        store: MemoryStore,
        tree: ObjectId,
        tick: i64,
    }

    impl Graph {
        fn new() -> Self {
            let mut store = MemoryStore::scratch();
            let tree = store.write_object(&GitObject::Tree(Vec::new())).unwrap();
            Self { store, tree, tick: 0 }
        }

        fn commit(&mut self, parents: &[&ObjectId]) -> ObjectId {
            self.tick += 1;
            self.store
                .write_object(&GitObject::Commit(CommitObject {
                    tree: self.tree.clone(),
                    parents: parents.iter().map(|p| (*p).clone()).collect(),
                    author: Signature::new("t", "t@example.com", self.tick),
                    message: format!("c{}", self.tick),
                }))
                .unwrap()
        }
    }

    #[test]
    fn test_same_commit() {
        let mut g = Graph::new();
        let a = g.commit(&[]);
        assert_eq!(find_merge_base(&g.store, &a, &a).unwrap(), Some(a));
    }

    #[test]
    fn test_diverged_branches() {
        let mut g = Graph::new();
        let root = g.commit(&[]);
        let m = g.commit(&[&root]);
        let master = g.commit(&[&m]);
        let f1 = g.commit(&[&m]);
        let feature = g.commit(&[&f1]);

        assert_eq!(find_merge_base(&g.store, &feature, &master).unwrap(), Some(m.clone()));
        assert_eq!(find_merge_base(&g.store, &master, &feature).unwrap(), Some(m));
    }

    #[test]
    fn test_ancestor_is_its_own_base() {
        let mut g = Graph::new();
        let m = g.commit(&[]);
        let tip = g.commit(&[&m]);
        assert_eq!(find_merge_base(&g.store, &tip, &m).unwrap(), Some(m.clone()));
        assert_eq!(find_merge_base(&g.store, &m, &tip).unwrap(), Some(m));
    }

    #[test]
    fn test_merge_commit_reaches_merged_tip() {
        let mut g = Graph::new();
        let root = g.commit(&[]);
        let old = g.commit(&[&root]);
        let feature = g.commit(&[&old]);
        let master_content = g.commit(&[&old]);
        // Merge of feature into master: parents [content, feature tip].
        let merged = g.commit(&[&master_content, &feature]);
        let feature_next = g.commit(&[&feature]);

        assert_eq!(
            find_merge_base(&g.store, &feature_next, &merged).unwrap(),
            Some(feature)
        );
    }

    #[test]
    fn test_missing_history_yields_none() {
        let mut g = Graph::new();
        let absent = ObjectId::from("0000000000000000000000000000000000000000");
        let a = g.commit(&[&absent]);
        let b = g.commit(&[&absent]);
        // A shared parent id counts even when the commit itself is not held.
        assert_eq!(find_merge_base(&g.store, &a, &b).unwrap(), Some(absent));

        let c = g.commit(&[&ObjectId::from("1111111111111111111111111111111111111111")]);
        let d = g.commit(&[&ObjectId::from("2222222222222222222222222222222222222222")]);
        assert_eq!(find_merge_base(&g.store, &c, &d).unwrap(), None);
    }

    #[test]
    fn test_non_commit_object_is_an_error() {
        let mut g = Graph::new();
        let a = g.commit(&[]);
        let tree = g.tree.clone();
        assert!(find_merge_base(&g.store, &a, &tree).is_err());
    }
}
