//! HTTP client for S3-compatible object stores.

use bytes::Bytes;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tracing::debug;
use url::Url;

use crate::error::RemoteError;
use crate::sign::{Credentials, SigV4Signer};
use crate::traits::{ListPage, ListRequest, ObjectStore};
use crate::xml;

/// Percent-encoding set for object keys: unreserved characters and `/`
/// stay literal, everything else is encoded.
const KEY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Configuration for [`S3Client`].
#[derive(Debug, Clone)]
pub struct S3ClientConfig {
    /// Bucket to mirror.
    pub bucket: String,
    /// Signing region.
    pub region: String,
    /// Custom endpoint (MinIO, localstack). When set, requests use
    /// path-style addressing; otherwise the AWS virtual-host URL is
    /// derived from bucket + region.
    pub endpoint: Option<String>,
    /// Credentials; `None` sends unsigned (anonymous) requests.
    pub credentials: Option<Credentials>,
}

/// S3-compatible REST client implementing [`ObjectStore`].
pub struct S3Client {
    http: reqwest::Client,
    /// Base URL ending in `/`; object keys append directly.
    base: Url,
    bucket: String,
    signer: Option<SigV4Signer>,
}

impl S3Client {
    /// Build a client from configuration.
    pub fn new(config: S3ClientConfig) -> Result<Self, RemoteError> {
        let base = match &config.endpoint {
            Some(endpoint) => {
                let endpoint = endpoint.trim_end_matches('/');
                Url::parse(&format!("{endpoint}/{}/", config.bucket))
                    .map_err(|e| RemoteError::Config(format!("endpoint: {e}")))?
            }
            None => Url::parse(&format!(
                "https://{}.s3.{}.amazonaws.com/",
                config.bucket, config.region
            ))
            .map_err(|e| RemoteError::Config(format!("bucket/region: {e}")))?,
        };

        let signer = config
            .credentials
            .map(|credentials| SigV4Signer::new(credentials, config.region.clone(), "s3"));

        Ok(Self {
            http: reqwest::Client::new(),
            base,
            bucket: config.bucket,
            signer,
        })
    }

    fn object_url(&self, key: &str) -> Result<Url, RemoteError> {
        let encoded = utf8_percent_encode(key, KEY_ENCODE).to_string();
        self.base
            .join(&encoded)
            .map_err(|e| RemoteError::Config(format!("key {key:?}: {e}")))
    }

    fn signed_headers(&self, method: &str, url: &Url) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(signer) = &self.signer {
            signer.sign(method, url, &mut headers, b"");
        }
        headers
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3Client {
    async fn list(&self, request: ListRequest) -> Result<ListPage, RemoteError> {
        let mut url = self.base.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("list-type", "2");
            query.append_pair("max-keys", &request.max_keys.to_string());
            if let Some(prefix) = &request.prefix {
                query.append_pair("prefix", prefix);
            }
            if let Some(token) = &request.continuation_token {
                query.append_pair("continuation-token", token);
            }
        }

        let headers = self.signed_headers("GET", &url);
        let response = self.http.get(url).headers(headers).send().await?;
        let status = response.status();
        match status {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(RemoteError::NoSuchBucket {
                    bucket: self.bucket.clone(),
                });
            }
            StatusCode::FORBIDDEN => return Err(RemoteError::AccessDenied),
            _ => {
                return Err(RemoteError::Status {
                    status: status.as_u16(),
                    body: truncate(&response.text().await.unwrap_or_default()),
                });
            }
        }

        let body = response.text().await?;
        let page = xml::parse_list_page(&body)?;
        debug!(
            bucket = %self.bucket,
            items = page.items.len(),
            truncated = page.next_continuation_token.is_some(),
            "listed page"
        );
        Ok(page)
    }

    async fn get(&self, key: &str) -> Result<Bytes, RemoteError> {
        let url = self.object_url(key)?;
        let headers = self.signed_headers("GET", &url);
        let response = self.http.get(url).headers(headers).send().await?;
        let status = response.status();
        match status {
            StatusCode::OK => Ok(response.bytes().await?),
            StatusCode::NOT_FOUND => Err(RemoteError::NoSuchKey {
                key: key.to_owned(),
            }),
            StatusCode::FORBIDDEN => Err(RemoteError::AccessDenied),
            _ => Err(RemoteError::Status {
                status: status.as_u16(),
                body: truncate(&response.text().await.unwrap_or_default()),
            }),
        }
    }
}

fn truncate(body: &str) -> String {
    const MAX: usize = 512;
    if body.len() <= MAX {
        body.to_owned()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}
