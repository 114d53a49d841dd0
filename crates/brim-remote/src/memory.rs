//! In-memory doubles for the remote store and the control plane.
//!
//! `MemoryStore` implements real pagination (continuation token = last key
//! of the previous page) so tests exercise the same multi-page code paths
//! the HTTP client does. `MemoryPubSub` records every control-plane call.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use bytes::Bytes;

use crate::error::RemoteError;
use crate::traits::{ListPage, ListRequest, ListedObject, ObjectStore, PubSubControl};

struct StoredObject {
    last_modified: SystemTime,
    body: Bytes,
}

/// `BTreeMap`-backed object store. Keys list in byte order, like S3.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    gets: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object.
    pub fn put(&self, key: impl Into<String>, body: impl Into<Bytes>, last_modified: SystemTime) {
        self.objects.lock().expect("store lock poisoned").insert(
            key.into(),
            StoredObject {
                last_modified,
                body: body.into(),
            },
        );
    }

    /// Remove an object if present.
    pub fn remove(&self, key: &str) {
        self.objects
            .lock()
            .expect("store lock poisoned")
            .remove(key);
    }

    /// How many `get` calls have been served. One successful `WriteObject`
    /// action costs exactly one fetch, so tests assert write counts here.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, request: ListRequest) -> Result<ListPage, RemoteError> {
        let objects = self.objects.lock().expect("store lock poisoned");
        let max_keys = request.max_keys.max(1) as usize;

        let items: Vec<ListedObject> = objects
            .iter()
            .filter(|(key, _)| {
                request
                    .continuation_token
                    .as_deref()
                    .is_none_or(|token| key.as_str() > token)
            })
            .filter(|(key, _)| {
                request
                    .prefix
                    .as_deref()
                    .is_none_or(|prefix| key.starts_with(prefix))
            })
            .take(max_keys)
            .map(|(key, stored)| ListedObject {
                key: key.clone(),
                last_modified: stored.last_modified,
                size: stored.body.len() as u64,
            })
            .collect();

        let next_continuation_token = if items.len() == max_keys {
            items.last().map(|item| item.key.clone())
        } else {
            None
        };

        Ok(ListPage {
            items,
            next_continuation_token,
        })
    }

    async fn get(&self, key: &str) -> Result<Bytes, RemoteError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.lock().expect("store lock poisoned");
        objects
            .get(key)
            .map(|stored| stored.body.clone())
            .ok_or_else(|| RemoteError::NoSuchKey {
                key: key.to_owned(),
            })
    }
}

/// One recorded control-plane call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCall {
    /// A `Subscribe` call.
    Subscribe {
        /// Topic ARN.
        topic_arn: String,
        /// Delivery endpoint.
        endpoint: String,
        /// Delivery protocol.
        protocol: String,
    },
    /// A `ConfirmSubscription` call.
    Confirm {
        /// Topic ARN.
        topic_arn: String,
        /// Confirmation token.
        token: String,
    },
    /// An `Unsubscribe` call.
    Unsubscribe {
        /// Subscription ARN.
        subscription_arn: String,
    },
}

/// Recording control-plane double.
#[derive(Default)]
pub struct MemoryPubSub {
    calls: Mutex<Vec<ControlCall>>,
    subscription_arn: String,
}

impl MemoryPubSub {
    /// Create a double that hands out `subscription_arn` on subscribe.
    pub fn new(subscription_arn: impl Into<String>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            subscription_arn: subscription_arn.into(),
        }
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<ControlCall> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    fn record(&self, call: ControlCall) {
        self.calls.lock().expect("calls lock poisoned").push(call);
    }
}

#[async_trait::async_trait]
impl PubSubControl for MemoryPubSub {
    async fn subscribe(
        &self,
        topic_arn: &str,
        endpoint: &str,
        protocol: &str,
    ) -> Result<String, RemoteError> {
        self.record(ControlCall::Subscribe {
            topic_arn: topic_arn.to_owned(),
            endpoint: endpoint.to_owned(),
            protocol: protocol.to_owned(),
        });
        Ok(self.subscription_arn.clone())
    }

    async fn confirm_subscription(
        &self,
        topic_arn: &str,
        token: &str,
    ) -> Result<(), RemoteError> {
        self.record(ControlCall::Confirm {
            topic_arn: topic_arn.to_owned(),
            token: token.to_owned(),
        });
        Ok(())
    }

    async fn unsubscribe(&self, subscription_arn: &str) -> Result<(), RemoteError> {
        self.record(ControlCall::Unsubscribe {
            subscription_arn: subscription_arn.to_owned(),
        });
        Ok(())
    }
}
