//! Synchronization core: remote snapshotting, the reconciler, and the
//! engine that executes file actions through the operation queue.
//!
//! A full sync is three steps: materialize a sorted snapshot of the remote
//! listing ([`snapshot`]), list the local tree, and run the pure merge in
//! [`reconcile`] which emits [`brim_types::FileAction`]s. The
//! [`MirrorEngine`] turns each action into a queue task keyed by its
//! target path; the notification ingress feeds the same engine through
//! the [`ActionSink`] trait, so both update paths share one execution
//! path and one per-path ordering domain.

mod engine;
mod error;
mod list;
mod reconcile;

pub use engine::{ActionSink, MirrorEngine, SyncOptions, SyncReport, failure_is_fatal};
pub use error::SyncError;
pub use list::snapshot;
pub use reconcile::reconcile;
