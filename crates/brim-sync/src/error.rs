//! Error types for the sync engine.

/// Errors that can occur while synchronizing.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The remote store failed.
    #[error("remote error: {0}")]
    Remote(#[from] brim_remote::RemoteError),

    /// A mirror-tree operation failed.
    #[error("fs error: {0}")]
    Fs(#[from] brim_fs::FsError),

    /// The operation queue rejected a submission.
    #[error("queue error: {0}")]
    Queue(#[from] brim_queue::QueueError),

    /// A prefetched list-page task was cancelled or panicked.
    #[error("list page task failed: {0}")]
    PageTask(String),
}
