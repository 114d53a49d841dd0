//! Remote snapshot: paged enumeration, filtering, transformation.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use brim_keys::KeyPipeline;
use brim_remote::{ListPage, ListRequest, ObjectStore, RemoteError};
use brim_types::RemoteObject;

use crate::error::SyncError;

/// Materialize the full remote listing as a byte-sorted vector of
/// [`RemoteObject`]s.
///
/// Pages are fetched through the continuation token, and the next page
/// request is initiated before the previous page's items are processed so
/// network I/O overlaps the transform work. Per item: the suffix filter
/// applies first, then the key pipeline; keys that transform to nothing
/// are dropped, and when two keys collide on the same transformed path
/// the later one wins (logged at WARN).
///
/// The whole listing is materialized before reconciling because the
/// transforms may reorder items relative to the provider's key order.
pub async fn snapshot(
    store: &Arc<dyn ObjectStore>,
    prefix: Option<&str>,
    suffix: Option<&str>,
    max_keys: u32,
    pipeline: &KeyPipeline,
) -> Result<Vec<RemoteObject>, SyncError> {
    let mut by_path: BTreeMap<String, RemoteObject> = BTreeMap::new();
    let mut pages = 0usize;
    let mut seen = 0usize;

    let mut page = store
        .list(ListRequest {
            prefix: prefix.map(str::to_owned),
            max_keys,
            continuation_token: None,
        })
        .await?;

    loop {
        pages += 1;
        let prefetch = page
            .next_continuation_token
            .take()
            .map(|token| spawn_page_fetch(store, prefix, max_keys, token));

        seen += page.items.len();
        for item in page.items {
            if let Some(suffix) = suffix
                && !item.key.ends_with(suffix)
            {
                continue;
            }
            let Some(transformed_key) = pipeline.apply(&item.key) else {
                debug!(key = %item.key, "key transforms to nothing — dropped");
                continue;
            };
            let object = RemoteObject {
                key: item.key,
                transformed_key: transformed_key.clone(),
                last_modified: item.last_modified,
                size: item.size,
            };
            if let Some(previous) = by_path.insert(transformed_key.clone(), object) {
                warn!(
                    path = %transformed_key,
                    dropped_key = %previous.key,
                    "transformed-key collision — later key wins"
                );
            }
        }

        match prefetch {
            Some(handle) => {
                page = handle
                    .await
                    .map_err(|e| SyncError::PageTask(e.to_string()))??;
            }
            None => break,
        }
    }

    debug!(pages, seen, kept = by_path.len(), "remote snapshot complete");
    Ok(by_path.into_values().collect())
}

fn spawn_page_fetch(
    store: &Arc<dyn ObjectStore>,
    prefix: Option<&str>,
    max_keys: u32,
    token: String,
) -> JoinHandle<Result<ListPage, RemoteError>> {
    let store = Arc::clone(store);
    let request = ListRequest {
        prefix: prefix.map(str::to_owned),
        max_keys,
        continuation_token: Some(token),
    };
    tokio::spawn(async move { store.list(request).await })
}
