//! The signed push envelope and the S3 event records it carries.
//!
//! The envelope is a tagged union on its `Type` field; parsing it up
//! front means no dynamically-typed `Message` payload travels further
//! into the system.

use percent_encoding::percent_decode_str;
use serde::Deserialize;

/// A push message, branched on `Type` at parse time.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "Type")]
pub enum Envelope {
    /// The control plane asks the endpoint to confirm a subscription.
    SubscriptionConfirmation(SubscriptionConfirmation),
    /// An event notification; `Message` carries serialized S3 records.
    Notification(Notification),
    /// Acknowledgement of an unsubscribe.
    UnsubscribeConfirmation(UnsubscribeConfirmation),
}

/// `Type: SubscriptionConfirmation` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubscriptionConfirmation {
    /// Message identifier.
    pub message_id: String,
    /// Topic the subscription belongs to.
    pub topic_arn: String,
    /// Token to echo back through `ConfirmSubscription`.
    pub token: String,
    /// Human-readable description.
    pub message: String,
    /// ISO-8601 send time.
    pub timestamp: String,
    /// Confirmation URL (unused; confirmation goes through the control
    /// plane client).
    #[serde(rename = "SubscribeURL", default)]
    pub subscribe_url: Option<String>,
    /// Signature scheme: `"1"` (SHA1) or `"2"` (SHA256).
    #[serde(default)]
    pub signature_version: Option<String>,
    /// Base64 signature over the canonical string.
    #[serde(default)]
    pub signature: Option<String>,
    /// Where to fetch the signing certificate.
    #[serde(rename = "SigningCertURL", default)]
    pub signing_cert_url: Option<String>,
}

/// `Type: Notification` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Notification {
    /// Message identifier.
    pub message_id: String,
    /// Source topic.
    pub topic_arn: String,
    /// Optional subject line.
    #[serde(default)]
    pub subject: Option<String>,
    /// The inner payload: serialized S3 event records.
    pub message: String,
    /// ISO-8601 send time.
    pub timestamp: String,
    /// Signature scheme: `"1"` (SHA1) or `"2"` (SHA256).
    #[serde(default)]
    pub signature_version: Option<String>,
    /// Base64 signature over the canonical string.
    #[serde(default)]
    pub signature: Option<String>,
    /// Where to fetch the signing certificate.
    #[serde(rename = "SigningCertURL", default)]
    pub signing_cert_url: Option<String>,
    /// Per-message unsubscribe URL (unused).
    #[serde(rename = "UnsubscribeURL", default)]
    pub unsubscribe_url: Option<String>,
}

/// `Type: UnsubscribeConfirmation` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnsubscribeConfirmation {
    /// Message identifier.
    pub message_id: String,
    /// Topic the subscription belonged to.
    pub topic_arn: String,
    /// Token that could re-confirm the subscription.
    pub token: String,
    /// Human-readable description.
    pub message: String,
    /// ISO-8601 send time.
    pub timestamp: String,
    /// Re-subscribe URL (unused).
    #[serde(rename = "SubscribeURL", default)]
    pub subscribe_url: Option<String>,
    /// Signature scheme.
    #[serde(default)]
    pub signature_version: Option<String>,
    /// Base64 signature.
    #[serde(default)]
    pub signature: Option<String>,
    /// Where to fetch the signing certificate.
    #[serde(rename = "SigningCertURL", default)]
    pub signing_cert_url: Option<String>,
}

impl Envelope {
    /// The base64 signature, when present.
    pub fn signature(&self) -> Option<&str> {
        match self {
            Self::SubscriptionConfirmation(m) => m.signature.as_deref(),
            Self::Notification(m) => m.signature.as_deref(),
            Self::UnsubscribeConfirmation(m) => m.signature.as_deref(),
        }
    }

    /// The signature scheme; `"1"` when unspecified.
    pub fn signature_version(&self) -> &str {
        let version = match self {
            Self::SubscriptionConfirmation(m) => &m.signature_version,
            Self::Notification(m) => &m.signature_version,
            Self::UnsubscribeConfirmation(m) => &m.signature_version,
        };
        version.as_deref().unwrap_or("1")
    }

    /// The signing-certificate URL, when present.
    pub fn signing_cert_url(&self) -> Option<&str> {
        match self {
            Self::SubscriptionConfirmation(m) => m.signing_cert_url.as_deref(),
            Self::Notification(m) => m.signing_cert_url.as_deref(),
            Self::UnsubscribeConfirmation(m) => m.signing_cert_url.as_deref(),
        }
    }

    /// The canonical string the signature covers: alternating label and
    /// value lines, labels in lexical order, each line newline-terminated.
    /// Token-bearing types include `SubscribeURL` and `Token`;
    /// notifications include `Subject` only when present.
    pub fn signing_input(&self) -> String {
        let mut out = String::new();
        let mut push = |label: &str, value: &str| {
            out.push_str(label);
            out.push('\n');
            out.push_str(value);
            out.push('\n');
        };
        match self {
            Self::Notification(m) => {
                push("Message", &m.message);
                push("MessageId", &m.message_id);
                if let Some(subject) = &m.subject {
                    push("Subject", subject);
                }
                push("Timestamp", &m.timestamp);
                push("TopicArn", &m.topic_arn);
                push("Type", "Notification");
            }
            Self::SubscriptionConfirmation(m) => {
                push("Message", &m.message);
                push("MessageId", &m.message_id);
                push("SubscribeURL", m.subscribe_url.as_deref().unwrap_or(""));
                push("Timestamp", &m.timestamp);
                push("Token", &m.token);
                push("TopicArn", &m.topic_arn);
                push("Type", "SubscriptionConfirmation");
            }
            Self::UnsubscribeConfirmation(m) => {
                push("Message", &m.message);
                push("MessageId", &m.message_id);
                push("SubscribeURL", m.subscribe_url.as_deref().unwrap_or(""));
                push("Timestamp", &m.timestamp);
                push("Token", &m.token);
                push("TopicArn", &m.topic_arn);
                push("Type", "UnsubscribeConfirmation");
            }
        }
        out
    }
}

// -----------------------------------------------------------------------
// S3 event records (the decoded `Message` of a Notification)
// -----------------------------------------------------------------------

/// The decoded `Message` payload: a batch of records.
#[derive(Debug, Clone, Deserialize)]
pub struct S3Event {
    /// Event records, possibly empty.
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

/// One object-change record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3EventRecord {
    /// Record schema version, `major.minor`.
    pub event_version: String,
    /// Event name, e.g. `ObjectCreated:Put`.
    pub event_name: String,
    /// Bucket and object references.
    pub s3: S3Entity,
}

/// The `s3` element of a record.
#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    /// Bucket reference.
    pub bucket: S3BucketRef,
    /// Object reference.
    pub object: S3ObjectRef,
}

/// Bucket reference inside a record.
#[derive(Debug, Clone, Deserialize)]
pub struct S3BucketRef {
    /// Bucket name.
    pub name: String,
}

/// Object reference inside a record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3ObjectRef {
    /// Object key, URL-encoded with `+` for spaces.
    pub key: String,
    /// Object size, absent on removal records.
    #[serde(default)]
    pub size: Option<u64>,
    /// Entity tag, when reported.
    #[serde(default)]
    pub e_tag: Option<String>,
}

impl S3EventRecord {
    /// Parse `eventVersion` into `(major, minor)`.
    pub fn version(&self) -> Option<(u32, u32)> {
        let mut parts = self.event_version.splitn(2, '.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().unwrap_or("0").parse().ok()?;
        Some((major, minor))
    }
}

/// Decode an object key as it appears in event records: `+` means space,
/// the rest is percent-encoded UTF-8.
pub fn decode_object_key(key: &str) -> String {
    let plus_decoded = key.replace('+', " ");
    percent_decode_str(&plus_decoded)
        .decode_utf8_lossy()
        .into_owned()
}
