//! Ingress error types and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Errors raised while handling notifications or managing the
/// subscription.
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    /// The request body was not a well-formed envelope.
    #[error("invalid envelope: {0}")]
    Parse(String),

    /// The message signature did not verify.
    #[error("signature verification failed: {0}")]
    Signature(String),

    /// The signing certificate URL violated the issuer policy.
    #[error("signing certificate rejected: {0}")]
    CertPolicy(String),

    /// The signing certificate could not be fetched or parsed.
    #[error("signing certificate unusable: {0}")]
    Cert(String),

    /// A control-plane call failed.
    #[error("control plane error: {0}")]
    Remote(#[from] brim_remote::RemoteError),

    /// Dispatching an action into the queue failed.
    #[error("dispatch error: {0}")]
    Sync(#[from] brim_sync::SyncError),

    /// Binding or serving the listener failed.
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),

    /// The ingress was configured inconsistently.
    #[error("invalid ingress configuration: {0}")]
    Config(String),
}

impl IntoResponse for IngressError {
    fn into_response(self) -> axum::response::Response {
        // Parse and validation failures answer 500 so the publisher
        // retries delivery; nothing from the rejected request was
        // processed.
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        tracing::warn!(error = %self, "rejecting notification request");
        (status, self.to_string()).into_response()
    }
}
