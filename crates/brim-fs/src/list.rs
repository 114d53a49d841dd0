//! Recursive sorted listing of the mirror tree.

use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use tracing::warn;

use brim_keys::KeyPipeline;
use brim_types::{LocalEntry, order};

use crate::error::FsError;

/// Walk `root` and return one [`LocalEntry`] per file and directory.
///
/// Directories are reported as `path` + separator; names run through the
/// transform pipeline (so Unicode normalization matches the remote side);
/// the flattened result is sorted by the byte comparator, which places
/// every directory immediately ahead of its descendants.
pub(crate) async fn list_tree(
    root: &Path,
    pipeline: &KeyPipeline,
) -> Result<Vec<LocalEntry>, FsError> {
    let mut entries = Vec::new();
    let mut stack: Vec<(PathBuf, String)> = vec![(root.to_path_buf(), String::new())];

    while let Some((dir, prefix)) = stack.pop() {
        let mut read_dir = tokio::fs::read_dir(&dir).await?;
        while let Some(dirent) = read_dir.next_entry().await? {
            let Some(name) = dirent.file_name().to_str().map(str::to_owned) else {
                warn!(path = %dirent.path().display(), "skipping non-unicode file name");
                continue;
            };
            let rel = format!("{prefix}{name}");
            let metadata = dirent.metadata().await?;
            let mtime = metadata.modified()?;

            if metadata.is_dir() {
                let rel_dir = format!("{rel}{MAIN_SEPARATOR}");
                match pipeline.apply(&rel_dir) {
                    Some(path) => entries.push(LocalEntry::dir(path, mtime)),
                    None => {
                        warn!(path = %rel_dir, "local name reduced to nothing under transforms");
                    }
                }
                stack.push((dirent.path(), format!("{rel}{MAIN_SEPARATOR}")));
            } else {
                match pipeline.apply(&rel) {
                    Some(path) => entries.push(LocalEntry::file(path, mtime, metadata.len())),
                    None => {
                        warn!(path = %rel, "local name reduced to nothing under transforms");
                    }
                }
            }
        }
    }

    entries.sort_by(|a, b| order::byte_cmp(&a.relative_path, &b.relative_path));
    Ok(entries)
}
