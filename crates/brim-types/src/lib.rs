//! Shared types for brim.
//!
//! This crate defines the data model used across the brim workspace: the
//! remote-side [`RemoteObject`], the local-side [`LocalEntry`], the
//! [`FileAction`] commands both update paths converge on, and the byte-wise
//! [`order`] comparator both sorted streams are merged under.

pub mod order;

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// An object as seen in the remote listing, after key transformation.
///
/// `transformed_key` doubles as the relative path under the mirror root and
/// as the queue partition key; it is guaranteed non-empty, never starts with
/// a separator, and never equals `/` (the transform pipeline drops such
/// keys before a `RemoteObject` is built).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    /// Original opaque identifier from the object store.
    pub key: String,
    /// Key after the transform pipeline; relative path under the mirror root.
    pub transformed_key: String,
    /// Last-modified instant reported by the store.
    pub last_modified: SystemTime,
    /// Object size in bytes.
    pub size: u64,
}

impl RemoteObject {
    /// Whether the transformed key denotes a directory placeholder
    /// (ends with `/` or `\`).
    pub fn is_dir_key(&self) -> bool {
        self.transformed_key.ends_with('/') || self.transformed_key.ends_with('\\')
    }
}

/// One entry of the flattened local tree.
///
/// Directories are reported with a trailing separator, regular files
/// without, so that a directory sorts strictly before its descendants
/// under the byte comparator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    /// Path relative to the mirror root; trailing separator for directories.
    pub relative_path: String,
    /// Modification time.
    pub mtime: SystemTime,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

impl LocalEntry {
    /// A regular-file entry.
    pub fn file(relative_path: impl Into<String>, mtime: SystemTime, size: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            mtime,
            size,
            is_dir: false,
        }
    }

    /// A directory entry. The trailing separator must already be present.
    pub fn dir(relative_path: impl Into<String>, mtime: SystemTime) -> Self {
        Self {
            relative_path: relative_path.into(),
            mtime,
            size: 0,
            is_dir: true,
        }
    }
}

/// A file-system mutation produced by the reconciler or the notification
/// ingress.
///
/// The partition key of an action is its target relative path
/// ([`FileAction::target`]); the queue serializes execution per target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileAction {
    /// Fetch the object body and materialize it atomically at the
    /// transformed key.
    WriteObject {
        /// Original remote key, used for the fetch.
        key: String,
        /// Target relative path.
        transformed_key: String,
        /// Remote last-modified instant, when known.
        last_modified: Option<SystemTime>,
        /// Remote size in bytes, when known.
        size: Option<u64>,
    },
    /// Unlink a regular file.
    RemoveFile {
        /// Target relative path.
        relative_path: String,
    },
    /// Remove a directory and everything under it.
    RemoveDirRecursive {
        /// Target relative path (with trailing separator).
        relative_path: String,
    },
    /// Ensure a directory exists (recursive create, no body fetch).
    Mkdir {
        /// Target relative path (with trailing separator).
        relative_path: String,
    },
}

impl FileAction {
    /// The relative path this action mutates — the queue partition key.
    pub fn target(&self) -> &str {
        match self {
            Self::WriteObject {
                transformed_key, ..
            } => transformed_key,
            Self::RemoveFile { relative_path }
            | Self::RemoveDirRecursive { relative_path }
            | Self::Mkdir { relative_path } => relative_path,
        }
    }
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteObject {
                key,
                transformed_key,
                ..
            } => write!(f, "write {key} -> {transformed_key}"),
            Self::RemoveFile { relative_path } => write!(f, "unlink {relative_path}"),
            Self::RemoveDirRecursive { relative_path } => write!(f, "rmtree {relative_path}"),
            Self::Mkdir { relative_path } => write!(f, "mkdir {relative_path}"),
        }
    }
}
