//! Error types for mirror-tree operations.

use std::path::PathBuf;

/// Errors that can occur while mutating or listing the mirror tree.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Recursive removal was requested for the mirror root or a
    /// file-system root.
    #[error("refusing recursive removal of {}", path.display())]
    RefusedRoot {
        /// The rejected path.
        path: PathBuf,
    },
}

impl FsError {
    /// Whether the error is an acceptable outcome of a mirror mutation:
    /// the target was already in the state the action wanted (absent /
    /// present), or a concurrent actor got there first. Acceptable errors
    /// are logged and treated as no-ops.
    pub fn is_acceptable(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::AlreadyExists
                    | std::io::ErrorKind::DirectoryNotEmpty
                    | std::io::ErrorKind::IsADirectory
            ),
            Self::RefusedRoot { .. } => false,
        }
    }
}
