//! Snapshot comparison.

use plexscan_common::{ChangeSet, Snapshot};

/// Compare a prior inventory against a fresh one.
///
/// Keys only in `fresh` are added, keys only in `prior` are removed, and keys
/// in both are modified when `(size, modified)` differs. With no prior
/// snapshot the result depends on `first_run_scans`: when set, every fresh
/// entry is added; otherwise the change set is empty and the fresh snapshot
/// only seeds the store.
pub fn diff(prior: Option<&Snapshot>, fresh: &Snapshot, first_run_scans: bool) -> ChangeSet {
    let mut changes = ChangeSet::default();

    let Some(prior) = prior else {
        if first_run_scans {
            changes.added = fresh.entries().keys().cloned().collect();
        }
        return changes;
    };

    for (path, entry) in fresh.entries() {
        match prior.get(path) {
            None => {
                changes.added.insert(path.clone());
            }
            Some(old) if !old.same_content(entry) => {
                changes.modified.insert(path.clone());
            }
            Some(_) => {}
        }
    }

    changes.removed = prior
        .entries()
        .keys()
        .filter(|path| fresh.get(path).is_none())
        .cloned()
        .collect();

    changes
}
