//! HTTP client for the SNS-compatible subscription control plane.

use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::debug;
use url::Url;

use crate::error::RemoteError;
use crate::sign::{Credentials, SigV4Signer};
use crate::traits::PubSubControl;
use crate::xml;

const API_VERSION: &str = "2010-03-31";

/// Configuration for [`SnsClient`].
#[derive(Debug, Clone)]
pub struct SnsClientConfig {
    /// Signing region.
    pub region: String,
    /// Custom endpoint; defaults to the regional SNS URL.
    pub endpoint: Option<String>,
    /// Credentials; `None` sends unsigned requests.
    pub credentials: Option<Credentials>,
}

/// SNS query-API client implementing [`PubSubControl`].
pub struct SnsClient {
    http: reqwest::Client,
    base: Url,
    signer: Option<SigV4Signer>,
}

impl SnsClient {
    /// Build a client from configuration.
    pub fn new(config: SnsClientConfig) -> Result<Self, RemoteError> {
        let base = match &config.endpoint {
            Some(endpoint) => Url::parse(endpoint)
                .map_err(|e| RemoteError::Config(format!("sns endpoint: {e}")))?,
            None => Url::parse(&format!("https://sns.{}.amazonaws.com/", config.region))
                .map_err(|e| RemoteError::Config(format!("sns region: {e}")))?,
        };
        let signer = config
            .credentials
            .map(|credentials| SigV4Signer::new(credentials, config.region.clone(), "sns"));
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            signer,
        })
    }

    /// Issue one query-API call and return the response body.
    async fn call(&self, action: &str, params: &[(&str, &str)]) -> Result<String, RemoteError> {
        let body = {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            form.append_pair("Action", action);
            form.append_pair("Version", API_VERSION);
            for (name, value) in params {
                form.append_pair(name, value);
            }
            form.finish()
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        if let Some(signer) = &self.signer {
            signer.sign("POST", &self.base, &mut headers, body.as_bytes());
        }

        let response = self
            .http
            .post(self.base.clone())
            .headers(headers)
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        match status {
            StatusCode::OK => {
                debug!(action, "control-plane call succeeded");
                Ok(text)
            }
            StatusCode::FORBIDDEN => Err(RemoteError::AccessDenied),
            _ => Err(RemoteError::Status {
                status: status.as_u16(),
                body: text.chars().take(512).collect(),
            }),
        }
    }
}

#[async_trait::async_trait]
impl PubSubControl for SnsClient {
    async fn subscribe(
        &self,
        topic_arn: &str,
        endpoint: &str,
        protocol: &str,
    ) -> Result<String, RemoteError> {
        let body = self
            .call(
                "Subscribe",
                &[
                    ("TopicArn", topic_arn),
                    ("Protocol", protocol),
                    ("Endpoint", endpoint),
                    ("ReturnSubscriptionArn", "true"),
                ],
            )
            .await?;
        xml::parse_subscription_arn(&body)
    }

    async fn confirm_subscription(
        &self,
        topic_arn: &str,
        token: &str,
    ) -> Result<(), RemoteError> {
        self.call(
            "ConfirmSubscription",
            &[("TopicArn", topic_arn), ("Token", token)],
        )
        .await?;
        Ok(())
    }

    async fn unsubscribe(&self, subscription_arn: &str) -> Result<(), RemoteError> {
        self.call("Unsubscribe", &[("SubscriptionArn", subscription_arn)])
            .await?;
        Ok(())
    }
}
