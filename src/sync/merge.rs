//! Newest-wins merge of a local and a remote tree.
//!
//! The result is a pending-actions tree: every surviving entry must move in
//! the direction its origin names. The inputs are never modified.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::tree::entry::{count_entries, Entry, Origin, Tree};

/// A key that is a file on one side and a folder on the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inconsistency {
    pub key: String,
    pub directory: String,
    pub local_is_folder: bool,
}

#[derive(Debug, Default)]
pub struct Merged {
    pub pending: Tree,
    pub inconsistencies: Vec<Inconsistency>,
}

impl Merged {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of entries in the pending tree, folders included.
    pub fn action_count(&self) -> usize {
        count_entries(&self.pending)
    }
}

/// Merge two trees of the same directory.
///
/// - keys on one side only are copied unchanged;
/// - folders on both sides keep the remote entry and merge their children,
///   and are dropped when nothing below them needs to move;
/// - files on both sides: the newer one wins, equal timestamps drop the key;
/// - a kind mismatch drops the key and is reported.
pub fn merge(local: &Tree, remote: &Tree) -> Merged {
    let mut merged = Merged::default();
    merge_into(local, remote, &mut merged.pending, &mut merged.inconsistencies);
    merged
}

fn merge_into(local: &Tree, remote: &Tree, pending: &mut Tree, issues: &mut Vec<Inconsistency>) {
    let local_keys: BTreeSet<&String> = local.keys().collect();
    let remote_keys: BTreeSet<&String> = remote.keys().collect();

    for key in local_keys.difference(&remote_keys) {
        pending.insert((*key).clone(), local[*key].clone());
    }
    for key in remote_keys.difference(&local_keys) {
        pending.insert((*key).clone(), remote[*key].clone());
    }

    for key in local_keys.intersection(&remote_keys) {
        let (l, r) = (&local[*key], &remote[*key]);

        match (has_children(l), has_children(r)) {
            (true, true) => {
                let mut children = Tree::new();
                merge_into(
                    l.children.as_ref().unwrap_or(&Tree::new()),
                    r.children.as_ref().unwrap_or(&Tree::new()),
                    &mut children,
                    issues,
                );
                if !children.is_empty() {
                    let mut folder = r.clone();
                    folder.children = Some(children);
                    pending.insert((*key).clone(), folder);
                }
            }
            (false, false) => {
                if let Some(winner) = newest(l, r) {
                    debug!(
                        key = key.as_str(),
                        winner = ?winner.origin,
                        "compared versions"
                    );
                    pending.insert((*key).clone(), winner.clone());
                }
            }
            (local_is_folder, _) => {
                warn!(key = key.as_str(), dir = l.directory.as_str(), "file/folder mismatch, skipping");
                issues.push(Inconsistency {
                    key: (*key).clone(),
                    directory: l.directory.clone(),
                    local_is_folder,
                });
            }
        }
    }
}

/// Folders carry a child mapping, files never do.
fn has_children(entry: &Entry) -> bool {
    entry.children.is_some()
}

/// The entry that must move, or `None` when both are in sync.
fn newest<'a>(local: &'a Entry, remote: &'a Entry) -> Option<&'a Entry> {
    debug_assert_eq!(local.origin, Origin::Local);
    debug_assert_eq!(remote.origin, Origin::Remote);
    match local.modified_at.cmp(&remote.modified_at) {
        std::cmp::Ordering::Equal => None,
        std::cmp::Ordering::Less => Some(remote),
        std::cmp::Ordering::Greater => Some(local),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteHead;
    use chrono::{DateTime, TimeZone, Utc};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn local_file(dir: &str, name: &str, secs: i64) -> Entry {
        Entry::local_file(dir, name, t(secs))
    }

    fn remote_file(dir: &str, name: &str, id: u64, secs: i64) -> Entry {
        Entry::from_head(
            RemoteHead {
                id,
                display_name: name.into(),
                file_name: name.into(),
                modified_at: t(secs),
            },
            dir,
        )
    }

    fn remote_folder(dir: &str, name: &str, id: u64, secs: i64, children: Tree) -> Entry {
        let mut entry = Entry::from_head(
            RemoteHead {
                id,
                display_name: format!("{dir}{name}/"),
                file_name: name.into(),
                modified_at: t(secs),
            },
            dir,
        );
        entry.children = Some(children);
        entry
    }

    fn tree(entries: Vec<Entry>) -> Tree {
        entries
            .into_iter()
            .map(|e| (e.display_name.clone(), e))
            .collect()
    }

    #[test]
    fn test_newest_wins() {
        for (local_secs, remote_secs, expected) in [
            (10, 20, Some(Origin::Remote)),
            (20, 10, Some(Origin::Local)),
            (15, 15, None),
        ] {
            let local = tree(vec![local_file("/", "a.txt", local_secs)]);
            let remote = tree(vec![remote_file("/", "a.txt", 1, remote_secs)]);

            let merged = merge(&local, &remote);
            assert_eq!(merged.pending.get("a.txt").map(|e| e.origin), expected);
        }
    }

    #[test]
    fn test_union_completeness() {
        let local = tree(vec![local_file("/", "only-local.txt", 1)]);
        let remote = tree(vec![remote_file("/", "only-remote.txt", 7, 1)]);

        let merged = merge(&local, &remote);

        assert_eq!(merged.pending.len(), 2);
        assert_eq!(merged.pending["only-local.txt"], local["only-local.txt"]);
        assert_eq!(merged.pending["only-remote.txt"], remote["only-remote.txt"]);
    }

    #[test]
    fn test_shared_folder_takes_remote_and_recurses() {
        let local = tree(vec![Entry::local_folder(
            "/",
            "docs",
            t(999),
            tree(vec![local_file("/docs/", "new.txt", 5), local_file("/docs/", "same.txt", 5)]),
        )]);
        let remote = tree(vec![remote_folder(
            "/",
            "docs",
            3,
            1,
            tree(vec![remote_file("/docs/", "same.txt", 4, 5)]),
        )]);

        let merged = merge(&local, &remote);
        let docs = &merged.pending["/docs/"];

        // A folder on both sides is the remote entry whose children are the
        // merge of both sides' children.
        assert_eq!(docs.origin, Origin::Remote);
        assert_eq!(docs.id, Some(3));
        assert_eq!(docs.modified_at, remote["/docs/"].modified_at);
        let nested = merge(
            local["/docs/"].children.as_ref().unwrap(),
            remote["/docs/"].children.as_ref().unwrap(),
        );
        assert_eq!(docs.children.as_ref(), Some(&nested.pending));

        let children = docs.children.as_ref().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children["new.txt"].origin, Origin::Local);
    }

    #[test]
    fn test_shared_folder_in_sync_is_dropped() {
        let local = tree(vec![Entry::local_folder(
            "/",
            "docs",
            t(50),
            tree(vec![local_file("/docs/", "a.txt", 5)]),
        )]);
        let remote = tree(vec![remote_folder(
            "/",
            "docs",
            3,
            1,
            tree(vec![remote_file("/docs/", "a.txt", 4, 5)]),
        )]);

        assert!(merge(&local, &remote).is_empty());
    }

    #[test]
    fn test_identical_trees_merge_to_nothing() {
        let local = tree(vec![local_file("/", "a.txt", 1), local_file("/", "b.txt", 2)]);
        let remote = tree(vec![remote_file("/", "a.txt", 1, 1), remote_file("/", "b.txt", 2, 2)]);

        let merged = merge(&local, &remote);
        assert!(merged.is_empty());
        assert!(merged.inconsistencies.is_empty());
    }

    #[test]
    fn test_kind_mismatch_is_reported_not_resolved() {
        // A remote that lists a folder without the trailing marker.
        let local = tree(vec![local_file("/", "notes", 1), local_file("/", "a.txt", 1)]);
        let mut folder_like = remote_file("/", "notes", 2, 1);
        folder_like.children = Some(Tree::new());
        let remote = tree(vec![folder_like, remote_file("/", "a.txt", 3, 2)]);

        let merged = merge(&local, &remote);

        assert_eq!(merged.inconsistencies.len(), 1);
        assert_eq!(merged.inconsistencies[0].key, "notes");
        assert!(!merged.inconsistencies[0].local_is_folder);
        assert!(!merged.pending.contains_key("notes"));
        assert_eq!(merged.pending["a.txt"].origin, Origin::Remote);
    }

    #[test]
    fn test_action_count_includes_nested() {
        let local = tree(vec![Entry::local_folder(
            "/",
            "docs",
            t(1),
            tree(vec![local_file("/docs/", "x.txt", 1)]),
        )]);
        let merged = merge(&local, &Tree::new());
        assert_eq!(merged.action_count(), 2);
    }
}
