//! Error types for the operation queue.

/// Errors returned by queue submission.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue has been stopped and refuses new submissions.
    #[error("queue is stopped")]
    Stopped,
}
