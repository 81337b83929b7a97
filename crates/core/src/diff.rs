//! Manifest diffs and three-way merge classification.

use tracing::{debug, warn};

use crate::config::LayoutConfig;
use crate::errors::StoreError;
use crate::git::ObjectStore;
use crate::manifest::{load_manifest, Manifest};
use crate::models::{ConfigFile, DiffResult, ObjectId};

/// Key-level difference of two manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatDiff {
    pub only_in_left: Vec<ConfigFile>,
    pub only_in_right: Vec<ConfigFile>,
    /// Same key, different blob: `(left, right)`.
    pub modified: Vec<(ConfigFile, ConfigFile)>,
}

pub fn flat_diff(left: &Manifest, right: &Manifest) -> FlatDiff {
    let mut diff = FlatDiff::default();
    for (key, l) in left {
        match right.get(key) {
            None => diff.only_in_left.push(l.clone()),
            Some(r) if r.oid != l.oid => diff.modified.push((l.clone(), r.clone())),
            Some(_) => {}
        }
    }
    diff.only_in_right = right
        .iter()
        .filter(|(key, _)| !left.contains_key(*key))
        .map(|(_, r)| r.clone())
        .collect();
    diff
}

/// Classify what merging `src` into `target` would do.
///
/// Without a base nothing is known about who changed what, so every
/// same-key mismatch is a conflict.
pub fn classify(src: &Manifest, target: &Manifest, base: Option<&Manifest>) -> DiffResult {
    let mut result = DiffResult::default();

    let Some(base) = base else {
        let unrelated = flat_diff(src, target);
        result.to_save = unrelated.only_in_left;
        result.conflict = unrelated.modified;
        return result;
    };

    let changes = flat_diff(src, base);

    for created in changes.only_in_left {
        match target.get(&key_of(&created)) {
            None => result.to_save.push(created),
            Some(t) if t.oid != created.oid => result.conflict.push((created, t.clone())),
            Some(_) => {}
        }
    }

    for deleted in changes.only_in_right {
        if let Some(t) = target.get(&key_of(&deleted)) {
            result.to_delete.push(t.clone());
        }
    }

    for (modified, old) in changes.modified {
        match target.get(&key_of(&old)) {
            None => result.to_save.push(modified),
            Some(t) if t.oid == old.oid => result.to_save.push(modified),
            Some(t) if t.oid != modified.oid => result.conflict.push((modified, t.clone())),
            Some(_) => {}
        }
    }

    result
}

fn key_of(file: &ConfigFile) -> String {
    crate::paths::file_key(file)
}

/// Three-way diff of two commits whose manifests are already loaded.
///
/// A base whose objects are not held locally counts as no base.
pub fn diff_manifests<S: ObjectStore + ?Sized>(
    store: &S,
    layout: &LayoutConfig,
    src: &ObjectId,
    target: &ObjectId,
    src_files: &Manifest,
    target_files: &Manifest,
    merge_base: Option<&ObjectId>,
) -> Result<DiffResult, StoreError> {
    if merge_base == Some(src) {
        debug!(src = %src, target = %target, "source already merged");
        return Ok(DiffResult::default());
    }

    let loaded;
    let base = match merge_base {
        None => None,
        Some(base) if base == target => Some(target_files),
        Some(base) => match load_manifest(store, layout, base) {
            Ok(files) => {
                loaded = files;
                Some(&loaded)
            }
            Err(e) if e.is_missing_object() => {
                warn!(base = %base, "merge base not held locally, diffing as unrelated histories");
                None
            }
            Err(e) => return Err(e),
        },
    };

    let result = classify(src_files, target_files, base);
    debug!(
        to_save = result.to_save.len(),
        to_delete = result.to_delete.len(),
        conflict = result.conflict.len(),
        "three-way diff"
    );
    Ok(result)
}

/// Three-way diff of `src` into `target` given their merge base.
pub fn three_way_diff<S: ObjectStore + ?Sized>(
    store: &S,
    layout: &LayoutConfig,
    src: &ObjectId,
    target: &ObjectId,
    merge_base: Option<&ObjectId>,
) -> Result<DiffResult, StoreError> {
    if merge_base == Some(src) {
        return Ok(DiffResult::default());
    }
    let src_files = load_manifest(store, layout, src)?;
    let target_files = load_manifest(store, layout, target)?;
    diff_manifests(store, layout, src, target, &src_files, &target_files, merge_base)
}
