//! AWS Signature V4 request signing.
//!
//! Client-side of the [SigV4 signing process][spec], shared by the S3 and
//! SNS clients. The canonical-request construction and the HMAC key chain
//! mirror what S3-compatible servers verify.
//!
//! [spec]: https://docs.aws.amazon.com/AmazonS3/latest/API/sig-v4-authenticating-requests.html

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::{Digest, Sha256};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Static credentials for request signing.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Access key identifier.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
}

/// Signs outgoing requests for one `(region, service)` pair.
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    credentials: Credentials,
    region: String,
    service: &'static str,
}

impl SigV4Signer {
    /// Create a signer.
    pub fn new(credentials: Credentials, region: impl Into<String>, service: &'static str) -> Self {
        Self {
            credentials,
            region: region.into(),
            service,
        }
    }

    /// Sign a request, inserting `host`, `x-amz-date`,
    /// `x-amz-content-sha256` and `authorization` headers.
    pub fn sign(&self, method: &str, url: &Url, headers: &mut HeaderMap, payload: &[u8]) {
        self.sign_at(Utc::now(), method, url, headers, payload);
    }

    /// Signing with an explicit clock, so tests produce stable signatures.
    pub fn sign_at(
        &self,
        now: DateTime<Utc>,
        method: &str,
        url: &Url,
        headers: &mut HeaderMap,
        payload: &[u8],
    ) {
        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let payload_hash = hex::encode(Sha256::digest(payload));

        let host = host_header(url);
        headers.insert("host", header_value(&host));
        headers.insert("x-amz-date", header_value(&timestamp));
        headers.insert("x-amz-content-sha256", header_value(&payload_hash));

        // Sign every header present so far, sorted by lowercase name.
        let mut signed: Vec<(String, String)> = headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_lowercase(),
                    value.to_str().unwrap_or("").trim().to_owned(),
                )
            })
            .collect();
        signed.sort();

        let canonical_headers: String = signed
            .iter()
            .map(|(name, value)| format!("{name}:{value}\n"))
            .collect();
        let signed_headers = signed
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method,
            url.path(),
            canonical_query_string(url.query().unwrap_or("")),
            canonical_headers,
            signed_headers,
            payload_hash,
        );

        let scope = format!("{date}/{}/{}/aws4_request", self.region, self.service);
        let hashed_request = hex::encode(Sha256::digest(canonical_request.as_bytes()));
        let string_to_sign = format!("AWS4-HMAC-SHA256\n{timestamp}\n{scope}\n{hashed_request}");

        let signing_key = self.derive_signing_key(&date);
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.credentials.access_key_id,
        );
        headers.insert("authorization", header_value(&authorization));
    }

    /// The SigV4 key chain:
    ///
    /// ```text
    /// DateKey    = HMAC-SHA256("AWS4" + secret, date)
    /// RegionKey  = HMAC-SHA256(DateKey, region)
    /// ServiceKey = HMAC-SHA256(RegionKey, service)
    /// SigningKey = HMAC-SHA256(ServiceKey, "aws4_request")
    /// ```
    fn derive_signing_key(&self, date: &str) -> Vec<u8> {
        let key = format!("AWS4{}", self.credentials.secret_access_key);
        let date_key = hmac_sha256(key.as_bytes(), date.as_bytes());
        let region_key = hmac_sha256(&date_key, self.region.as_bytes());
        let service_key = hmac_sha256(&region_key, self.service.as_bytes());
        hmac_sha256(&service_key, b"aws4_request")
    }
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    }
}

fn header_value(s: &str) -> HeaderValue {
    HeaderValue::from_str(s).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Sort query parameters by key, then value.
fn canonical_query_string(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }
    let mut pairs: Vec<(&str, &str)> = query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let mut split = pair.splitn(2, '=');
            let key = split.next().unwrap_or("");
            let val = split.next().unwrap_or("");
            (key, val)
        })
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_signer() -> SigV4Signer {
        SigV4Signer::new(
            Credentials {
                access_key_id: "AKIDEXAMPLE".into(),
                secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
            },
            "us-east-1",
            "s3",
        )
    }

    #[test]
    fn test_signature_is_deterministic() {
        let signer = test_signer();
        let url = Url::parse("https://bucket.s3.us-east-1.amazonaws.com/?list-type=2").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 2, 25, 12, 0, 0).unwrap();

        let mut h1 = HeaderMap::new();
        signer.sign_at(now, "GET", &url, &mut h1, b"");
        let mut h2 = HeaderMap::new();
        signer.sign_at(now, "GET", &url, &mut h2, b"");

        assert_eq!(h1.get("authorization"), h2.get("authorization"));
        assert_eq!(
            h1.get("x-amz-date").unwrap().to_str().unwrap(),
            "20260225T120000Z"
        );
    }

    #[test]
    fn test_signature_covers_payload() {
        let signer = test_signer();
        let url = Url::parse("https://sns.us-east-1.amazonaws.com/").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 2, 25, 12, 0, 0).unwrap();

        let mut h1 = HeaderMap::new();
        signer.sign_at(now, "POST", &url, &mut h1, b"Action=Subscribe");
        let mut h2 = HeaderMap::new();
        signer.sign_at(now, "POST", &url, &mut h2, b"Action=Unsubscribe");

        assert_ne!(h1.get("authorization"), h2.get("authorization"));
    }

    #[test]
    fn test_authorization_shape() {
        let signer = test_signer();
        let url = Url::parse("https://bucket.s3.us-east-1.amazonaws.com/key").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 2, 25, 12, 0, 0).unwrap();

        let mut headers = HeaderMap::new();
        signer.sign_at(now, "GET", &url, &mut headers, b"");

        let auth = headers.get("authorization").unwrap().to_str().unwrap();
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260225/us-east-1/s3/aws4_request"
        ));
        assert!(auth.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date"));
        assert!(auth.contains("Signature="));
    }

    #[test]
    fn test_canonical_query_string_sorts() {
        assert_eq!(
            canonical_query_string("z=1&a=2&list-type=2"),
            "a=2&list-type=2&z=1"
        );
        assert_eq!(canonical_query_string(""), "");
    }

    #[test]
    fn test_host_header_keeps_nonstandard_port() {
        let url = Url::parse("http://127.0.0.1:9000/bucket").unwrap();
        assert_eq!(host_header(&url), "127.0.0.1:9000");
        let url = Url::parse("https://s3.amazonaws.com/").unwrap();
        assert_eq!(host_header(&url), "s3.amazonaws.com");
    }
}
