//! File-system side effects for the brim mirror.
//!
//! All mutations of the mirror tree happen through a [`MirrorTree`]:
//! atomic write-via-temp with rename promotion, unlink with optional
//! empty-parent pruning, guarded recursive removal, and the recursive
//! sorted listing the reconciler consumes.
//!
//! Only one mutation per target path is ever in flight — the operation
//! queue guarantees that — so these functions do not lock anything
//! themselves.

mod error;
mod list;
mod tree;

pub use error::FsError;
pub use tree::MirrorTree;
