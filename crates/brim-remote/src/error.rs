//! Error types for remote operations.

/// Errors returned by the remote store and control-plane clients.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The requested object key does not exist.
    #[error("no such key: {key}")]
    NoSuchKey {
        /// Object key.
        key: String,
    },

    /// The bucket does not exist.
    #[error("no such bucket: {bucket}")]
    NoSuchBucket {
        /// Bucket name.
        bucket: String,
    },

    /// The credentials were rejected.
    #[error("access denied")]
    AccessDenied,

    /// The remote answered with an unexpected HTTP status.
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// The HTTP transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body could not be parsed.
    #[error("malformed response: {0}")]
    Parse(String),

    /// The client was configured with an invalid endpoint or bucket.
    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl RemoteError {
    /// Hard remote errors: the operator must fix configuration or
    /// credentials, so the daemon shuts down rather than retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NoSuchBucket { .. } | Self::AccessDenied)
    }

    /// Acceptable errors: the remote object disappeared between listing
    /// and fetch (or notification and fetch); the next reconciliation
    /// settles it.
    pub fn is_acceptable(&self) -> bool {
        matches!(self, Self::NoSuchKey { .. })
    }
}
