//! The interfaces the mirror core consumes.

use std::time::SystemTime;

use bytes::Bytes;

use crate::error::RemoteError;

/// Parameters of one paged list call.
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    /// Restrict the listing to keys with this prefix.
    pub prefix: Option<String>,
    /// Page size.
    pub max_keys: u32,
    /// Continuation token from the previous page, if any.
    pub continuation_token: Option<String>,
}

/// One object as reported by the listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    /// Opaque object key.
    pub key: String,
    /// Last-modified instant.
    pub last_modified: SystemTime,
    /// Size in bytes.
    pub size: u64,
}

/// One page of listing results.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Objects on this page, in the provider's order.
    pub items: Vec<ListedObject>,
    /// Token for the next page; `None` on the last page.
    pub next_continuation_token: Option<String>,
}

/// Read access to the remote bucket.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one page of the bucket listing.
    async fn list(&self, request: ListRequest) -> Result<ListPage, RemoteError>;

    /// Fetch a full object body.
    async fn get(&self, key: &str) -> Result<Bytes, RemoteError>;
}

/// Subscription management against the pub/sub control plane.
#[async_trait::async_trait]
pub trait PubSubControl: Send + Sync {
    /// Subscribe `endpoint` to `topic_arn`; returns the subscription
    /// identifier.
    async fn subscribe(
        &self,
        topic_arn: &str,
        endpoint: &str,
        protocol: &str,
    ) -> Result<String, RemoteError>;

    /// Confirm a pending subscription with the token delivered to the
    /// endpoint.
    async fn confirm_subscription(&self, topic_arn: &str, token: &str)
    -> Result<(), RemoteError>;

    /// Cancel a subscription.
    async fn unsubscribe(&self, subscription_arn: &str) -> Result<(), RemoteError>;
}
