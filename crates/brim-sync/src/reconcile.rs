//! The reconciler: a single-cursor merge over the sorted remote and local
//! streams.

use tracing::trace;

use brim_types::{FileAction, LocalEntry, RemoteObject, order};

/// Merge-compare the two sorted streams and emit the actions that bring
/// the local tree in line with the remote listing.
///
/// Both inputs must be sorted under the byte comparator — `remote` by
/// `transformed_key`, `local` by `relative_path` — which
/// [`crate::snapshot`] and the mirror-tree listing guarantee.
///
/// `remove` gates all deletions: with it off, local-only entries are
/// passed over (the cursor still advances, also for regular files).
/// When a directory is removed recursively, every local entry underneath
/// it is consumed in the same step to keep the cursors aligned.
pub fn reconcile<F>(remote: &[RemoteObject], local: &[LocalEntry], remove: bool, mut submit: F)
where
    F: FnMut(FileAction),
{
    let mut r = 0;
    let mut l = 0;

    loop {
        match (remote.get(r), local.get(l)) {
            (None, None) => break,

            // Remote exhausted: everything left is local-only.
            (None, Some(entry)) => {
                if !remove {
                    l += 1;
                } else if entry.is_dir {
                    submit(FileAction::RemoveDirRecursive {
                        relative_path: entry.relative_path.clone(),
                    });
                    l = skip_subtree(local, l);
                } else {
                    submit(FileAction::RemoveFile {
                        relative_path: entry.relative_path.clone(),
                    });
                    l += 1;
                }
            }

            // Local exhausted: everything left is new.
            (Some(object), None) => {
                submit(write_action(object));
                r += 1;
            }

            (Some(object), Some(entry)) => {
                match order::byte_cmp(&entry.relative_path, &object.transformed_key) {
                    std::cmp::Ordering::Less => {
                        // Local-only entry.
                        if !remove {
                            l += 1;
                        } else if entry.is_dir
                            && !object.transformed_key.starts_with(&entry.relative_path)
                        {
                            submit(FileAction::RemoveDirRecursive {
                                relative_path: entry.relative_path.clone(),
                            });
                            l = skip_subtree(local, l);
                        } else if entry.is_dir {
                            // The current remote key lives inside this
                            // directory; keep it and process descendants.
                            l += 1;
                        } else {
                            submit(FileAction::RemoveFile {
                                relative_path: entry.relative_path.clone(),
                            });
                            l += 1;
                        }
                    }
                    std::cmp::Ordering::Equal => {
                        if entry.is_dir {
                            trace!(path = %entry.relative_path, "directory already present");
                        } else if object.last_modified > entry.mtime || object.size != entry.size
                        {
                            submit(write_action(object));
                        } else {
                            trace!(path = %entry.relative_path, "unchanged");
                        }
                        r += 1;
                        l += 1;
                    }
                    std::cmp::Ordering::Greater => {
                        // Remote-only entry.
                        submit(write_action(object));
                        r += 1;
                    }
                }
            }
        }
    }
}

fn write_action(object: &RemoteObject) -> FileAction {
    if object.is_dir_key() {
        FileAction::Mkdir {
            relative_path: object.transformed_key.clone(),
        }
    } else {
        FileAction::WriteObject {
            key: object.key.clone(),
            transformed_key: object.transformed_key.clone(),
            last_modified: Some(object.last_modified),
            size: Some(object.size),
        }
    }
}

/// Advance past `local[index]` (a directory) and every entry underneath it.
fn skip_subtree(local: &[LocalEntry], index: usize) -> usize {
    let prefix = &local[index].relative_path;
    let mut next = index + 1;
    while next < local.len() && local[next].relative_path.starts_with(prefix.as_str()) {
        next += 1;
    }
    next
}
