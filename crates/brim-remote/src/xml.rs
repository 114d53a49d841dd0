//! XML payload parsing for the S3 and SNS wire dialects, via `quick-xml`
//! + `serde`.

use chrono::DateTime;
use serde::Deserialize;

use crate::error::RemoteError;
use crate::traits::{ListPage, ListedObject};

// -----------------------------------------------------------------------
// ListObjectsV2 (GET /?list-type=2)
// -----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    next_continuation_token: Option<String>,
    #[serde(default)]
    is_truncated: Option<bool>,
    #[serde(rename = "Contents", default)]
    contents: Vec<Contents>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Contents {
    key: String,
    last_modified: String,
    size: u64,
}

/// Parse a `ListObjectsV2` response body into a [`ListPage`].
pub(crate) fn parse_list_page(xml: &str) -> Result<ListPage, RemoteError> {
    let result: ListBucketResult = quick_xml::de::from_str(xml)
        .map_err(|e| RemoteError::Parse(format!("ListBucketResult: {e}")))?;

    let mut items = Vec::with_capacity(result.contents.len());
    for entry in result.contents {
        let last_modified = DateTime::parse_from_rfc3339(&entry.last_modified)
            .map_err(|e| RemoteError::Parse(format!("LastModified {:?}: {e}", entry.last_modified)))?
            .to_utc()
            .into();
        items.push(ListedObject {
            key: entry.key,
            last_modified,
            size: entry.size,
        });
    }

    // Some stores omit IsTruncated but set the token; trust the token.
    let next_continuation_token = if result.is_truncated == Some(false) {
        None
    } else {
        result.next_continuation_token
    };

    Ok(ListPage {
        items,
        next_continuation_token,
    })
}

// -----------------------------------------------------------------------
// SNS query-API responses
// -----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubscribeResponse {
    #[serde(rename = "SubscribeResult")]
    result: SubscribeResult,
}

#[derive(Debug, Deserialize)]
struct SubscribeResult {
    #[serde(rename = "SubscriptionArn")]
    subscription_arn: String,
}

/// Extract the subscription ARN from a `Subscribe` response.
pub(crate) fn parse_subscription_arn(xml: &str) -> Result<String, RemoteError> {
    let response: SubscribeResponse = quick_xml::de::from_str(xml)
        .map_err(|e| RemoteError::Parse(format!("SubscribeResponse: {e}")))?;
    Ok(response.result.subscription_arn)
}
