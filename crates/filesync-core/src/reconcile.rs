//! Reconciliation: turning two catalogs into push and delete sets.
//!
//! Both functions are pure. Neither depends on catalog order; results follow
//! the order of the first argument.

use crate::catalog::FileCatalog;
use std::collections::HashSet;

/// Paths the source holds that the destination needs.
///
/// A path is pushed when the destination lacks it, or when the source copy is
/// strictly newer *and* its content differs. A newer file with identical
/// content is not resent, and an older or equally old copy never wins even if
/// the bytes differ.
pub fn files_to_push(source: &FileCatalog, dest: &FileCatalog) -> Vec<String> {
    let dest = dest.index();

    source
        .iter()
        .filter(|s| match dest.get(s.path.as_str()) {
            None => true,
            Some(d) => s.mod_time > d.mod_time && s.content_hash != d.content_hash,
        })
        .map(|s| s.path.clone())
        .collect()
}

/// Paths present in `old` but missing from `new`: local deletions to propagate.
///
/// An empty `old` catalog (first cycle) yields nothing.
pub fn files_to_delete(old: &FileCatalog, new: &FileCatalog) -> Vec<String> {
    let current: HashSet<&str> = new.iter().map(|f| f.path.as_str()).collect();

    old.iter()
        .filter(|f| !current.contains(f.path.as_str()))
        .map(|f| f.path.clone())
        .collect()
}
