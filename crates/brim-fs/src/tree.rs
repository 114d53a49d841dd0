//! The mirror tree and its mutations.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::{debug, warn};

use brim_keys::KeyPipeline;
use brim_types::LocalEntry;

use crate::error::FsError;
use crate::list;

/// Handle to the local mirror root.
///
/// Writes are atomic: the object body is staged at
/// `{tmp_dir|root}/{key}.{random}{tmp_suffix}` and promoted into place by
/// rename. The random component guards against two writes for the same key
/// racing each other across queue timeout boundaries. Rename is atomic only
/// within one file system; when `tmp_dir` sits on another volume the
/// promotion degrades to copy-then-delete, which external watchers can
/// observe mid-copy.
pub struct MirrorTree {
    root: PathBuf,
    tmp_dir: Option<PathBuf>,
    tmp_suffix: String,
    prune_empty_dirs: bool,
}

impl MirrorTree {
    /// Create a mirror tree rooted at `root`, creating the directory if
    /// needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, FsError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            tmp_dir: None,
            tmp_suffix: ".tmp".to_owned(),
            prune_empty_dirs: false,
        })
    }

    /// Stage temp files in `dir` instead of under the mirror root.
    pub fn with_tmp_dir(mut self, dir: impl AsRef<Path>) -> Result<Self, FsError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        self.tmp_dir = Some(dir);
        Ok(self)
    }

    /// Override the staging suffix (default `.tmp`).
    pub fn with_tmp_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.tmp_suffix = suffix.into();
        self
    }

    /// Remove a file's parent directory when the unlink leaves it empty.
    pub fn with_prune_empty_dirs(mut self, prune: bool) -> Self {
        self.prune_empty_dirs = prune;
        self
    }

    /// The mirror root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Materialize an object body at `relative_path` atomically.
    pub async fn write_object(&self, relative_path: &str, body: Bytes) -> Result<(), FsError> {
        let target = self.root.join(relative_path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_name = format!(
            "{relative_path}.{}{}",
            random_suffix(),
            self.tmp_suffix
        );
        let tmp_path = self.tmp_dir.as_deref().unwrap_or(&self.root).join(&tmp_name);
        if let Some(parent) = tmp_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&tmp_path, &body).await?;

        match tokio::fs::rename(&tmp_path, &target).await {
            Ok(()) => {}
            Err(e) if is_cross_device(&e) => {
                debug!(
                    tmp = %tmp_path.display(),
                    target = %target.display(),
                    "rename crosses file systems — promoting by copy"
                );
                tokio::fs::copy(&tmp_path, &target).await?;
                tokio::fs::remove_file(&tmp_path).await?;
            }
            Err(e) => {
                // Leave no staging residue behind a failed promotion.
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(e.into());
            }
        }

        debug!(path = %target.display(), size = body.len(), "wrote object");
        Ok(())
    }

    /// Ensure a directory exists (recursive create).
    pub async fn ensure_dir(&self, relative_path: &str) -> Result<(), FsError> {
        let rel = relative_path.trim_end_matches(['/', '\\']);
        if rel.is_empty() {
            return Ok(());
        }
        tokio::fs::create_dir_all(self.root.join(rel)).await?;
        Ok(())
    }

    /// Unlink a file. A missing file is not an error. With pruning
    /// enabled, a parent directory left empty by the unlink is removed
    /// (never the mirror root).
    pub async fn remove_file(&self, relative_path: &str) -> Result<(), FsError> {
        let path = self.root.join(relative_path);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "removed file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "file already absent");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        if self.prune_empty_dirs {
            self.prune_parent(&path).await;
        }
        Ok(())
    }

    /// Remove a directory subtree. Refuses the mirror root and any
    /// file-system root; a missing directory is not an error.
    pub async fn remove_dir_recursive(&self, relative_path: &str) -> Result<(), FsError> {
        let rel = relative_path.trim_end_matches(['/', '\\']);
        if rel.is_empty() {
            return Err(FsError::RefusedRoot {
                path: self.root.clone(),
            });
        }
        let path = self.root.join(rel);
        if path == self.root || path.parent().is_none() {
            return Err(FsError::RefusedRoot { path });
        }
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed directory tree");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "directory already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Flattened, transformed, byte-sorted listing of the mirror tree.
    pub async fn list(&self, pipeline: &KeyPipeline) -> Result<Vec<LocalEntry>, FsError> {
        list::list_tree(&self.root, pipeline).await
    }

    /// `remove_dir` succeeds only on an empty directory, which is exactly
    /// the condition pruning wants; any failure means "leave it".
    async fn prune_parent(&self, removed: &Path) {
        let Some(parent) = removed.parent() else {
            return;
        };
        if parent == self.root {
            return;
        }
        match tokio::fs::remove_dir(parent).await {
            Ok(()) => debug!(path = %parent.display(), "pruned empty directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) if e.kind() == std::io::ErrorKind::DirectoryNotEmpty => {}
            Err(e) => warn!(path = %parent.display(), error = %e, "failed to prune directory"),
        }
    }
}

fn random_suffix() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

#[cfg(unix)]
fn is_cross_device(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_e: &std::io::Error) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_tree() -> (MirrorTree, TempDir) {
        let dir = TempDir::new().unwrap();
        let tree = MirrorTree::new(dir.path().join("mirror")).unwrap();
        (tree, dir)
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_leaves_no_tmp() {
        let (tree, _dir) = make_tree();
        tree.write_object("a/b/c.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let target = tree.root().join("a/b/c.txt");
        assert_eq!(std::fs::read(&target).unwrap(), b"hello");

        // No staging file anywhere under the root.
        let mut stack = vec![tree.root().to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir).unwrap() {
                let entry = entry.unwrap();
                let name = entry.file_name().to_string_lossy().into_owned();
                assert!(!name.ends_with(".tmp"), "staging residue: {name}");
                if entry.file_type().unwrap().is_dir() {
                    stack.push(entry.path());
                }
            }
        }
    }

    #[tokio::test]
    async fn test_write_overwrites_existing_content() {
        let (tree, _dir) = make_tree();
        tree.write_object("x.txt", Bytes::from_static(b"one"))
            .await
            .unwrap();
        tree.write_object("x.txt", Bytes::from_static(b"two"))
            .await
            .unwrap();
        assert_eq!(std::fs::read(tree.root().join("x.txt")).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_write_stages_in_tmp_dir_when_set() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("staging");
        let tree = MirrorTree::new(dir.path().join("mirror"))
            .unwrap()
            .with_tmp_dir(&staging)
            .unwrap();

        tree.write_object("f.txt", Bytes::from_static(b"body"))
            .await
            .unwrap();

        assert_eq!(std::fs::read(tree.root().join("f.txt")).unwrap(), b"body");
        // Staging dir exists and holds no residue.
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_remove_missing_file_is_ok() {
        let (tree, _dir) = make_tree();
        tree.remove_file("nope.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_prune_removes_emptied_parent_but_not_root() {
        let dir = TempDir::new().unwrap();
        let tree = MirrorTree::new(dir.path().join("mirror"))
            .unwrap()
            .with_prune_empty_dirs(true);

        tree.write_object("sub/only.txt", Bytes::from_static(b"x"))
            .await
            .unwrap();
        tree.remove_file("sub/only.txt").await.unwrap();
        assert!(!tree.root().join("sub").exists(), "emptied parent pruned");
        assert!(tree.root().exists(), "mirror root never pruned");

        // A parent with siblings survives.
        tree.write_object("keep/a.txt", Bytes::from_static(b"a"))
            .await
            .unwrap();
        tree.write_object("keep/b.txt", Bytes::from_static(b"b"))
            .await
            .unwrap();
        tree.remove_file("keep/a.txt").await.unwrap();
        assert!(tree.root().join("keep").exists());
    }

    #[tokio::test]
    async fn test_remove_dir_recursive_and_guards() {
        let (tree, _dir) = make_tree();
        tree.write_object("gone/deep/f.txt", Bytes::from_static(b"x"))
            .await
            .unwrap();

        tree.remove_dir_recursive("gone/").await.unwrap();
        assert!(!tree.root().join("gone").exists());

        // Missing tree is fine.
        tree.remove_dir_recursive("gone/").await.unwrap();

        // The root itself is refused.
        assert!(matches!(
            tree.remove_dir_recursive("").await,
            Err(FsError::RefusedRoot { .. })
        ));
        assert!(matches!(
            tree.remove_dir_recursive("/").await,
            Err(FsError::RefusedRoot { .. })
        ));
    }

    #[tokio::test]
    async fn test_ensure_dir() {
        let (tree, _dir) = make_tree();
        tree.ensure_dir("a/b/").await.unwrap();
        assert!(tree.root().join("a/b").is_dir());
        // Idempotent.
        tree.ensure_dir("a/b/").await.unwrap();
    }

    #[test]
    fn test_acceptable_error_classification() {
        let not_found: FsError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert!(not_found.is_acceptable());

        let exists: FsError = std::io::Error::from(std::io::ErrorKind::AlreadyExists).into();
        assert!(exists.is_acceptable());

        let denied: FsError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert!(!denied.is_acceptable());

        let refused = FsError::RefusedRoot {
            path: PathBuf::from("/"),
        };
        assert!(!refused.is_acceptable());
    }
}
