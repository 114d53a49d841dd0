//! TOML configuration for the brim daemon.
//!
//! Every option has a serde default, so a minimal config only names the
//! bucket and the mirror root. CLI flags override file values after
//! loading; [`MirrorConfig::validate`] enforces the cross-option rules
//! before any side effect happens.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use brim_ingress::{IngressConfig, SubscriptionConfig, TlsConfig};
use brim_keys::{KeyPipeline, NormalizationForm, PlatformProfile};
use brim_queue::QueueConfig;
use brim_remote::{Credentials, S3ClientConfig, SnsClientConfig};
use brim_sync::SyncOptions;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Remote bucket and transport.
    pub remote: RemoteSection,
    /// Local mirror behavior.
    pub mirror: MirrorSection,
    /// Operation queue tuning.
    pub queue: QueueSection,
    /// Full-sync scheduling.
    pub sync: SyncSection,
    /// Notification ingress.
    pub ingress: IngressSection,
    /// Subscription management.
    pub subscription: SubscriptionSection,
    /// Logging.
    pub log: LogSection,
}

/// `[remote]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    /// Bucket to mirror (required).
    pub bucket: String,
    /// Transport region.
    pub region: String,
    /// Custom S3 endpoint (MinIO, localstack).
    pub endpoint: Option<String>,
    /// Access key; anonymous requests when unset.
    pub access_key: Option<String>,
    /// Secret key.
    pub secret_key: Option<String>,
    /// Key prefix filter, applied at list time.
    pub prefix: Option<String>,
    /// Key suffix filter, applied client-side.
    pub suffix: Option<String>,
    /// List page size.
    pub max_keys: u32,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_owned(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            prefix: None,
            suffix: None,
            max_keys: 1000,
        }
    }
}

/// `[mirror]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MirrorSection {
    /// Local mirror root (required).
    pub root_dir: PathBuf,
    /// Staging directory; defaults to the mirror root.
    pub tmp_dir: Option<PathBuf>,
    /// Staging file suffix.
    pub tmp_suffix: String,
    /// Permit deletions during reconciliation.
    pub remove: bool,
    /// Remove parent directories emptied by an unlink.
    pub prune_empty_dirs: bool,
    /// Unicode normalization form (NFC/NFD/NFKC/NFKD).
    pub normalization_form: Option<String>,
    /// Disable separator normalization in keys.
    pub ignore_key_platform_dir_char_replacement: bool,
    /// Disable root-prefix stripping in keys.
    pub ignore_key_root_char_replacement: bool,
}

impl Default for MirrorSection {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::new(),
            tmp_dir: None,
            tmp_suffix: ".tmp".to_owned(),
            remove: false,
            prune_empty_dirs: false,
            normalization_form: None,
            ignore_key_platform_dir_char_replacement: false,
            ignore_key_root_char_replacement: false,
        }
    }
}

/// `[queue]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    /// Concurrency cap across distinct keys.
    pub max_concurrency: usize,
    /// Per-task timeout in milliseconds.
    pub task_timeout_ms: u64,
    /// Reaper sweep interval in milliseconds.
    pub reaper_interval_ms: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_concurrency: 300,
            task_timeout_ms: 60_000,
            reaper_interval_ms: 1_000,
        }
    }
}

/// `[sync]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Skip the start-up full sync.
    pub skip_initial_sync: bool,
    /// Periodic resync interval in milliseconds; 0 disables the timer.
    pub resync_interval_ms: u64,
    /// Bound on queue drain at shutdown before escalating.
    pub shutdown_timeout_ms: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            skip_initial_sync: false,
            resync_interval_ms: 0,
            shutdown_timeout_ms: 30_000,
        }
    }
}

/// `[ingress]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IngressSection {
    /// Bind host.
    pub host: String,
    /// Bind port; the ingress only starts when set.
    pub port: Option<u16>,
    /// Restrict POSTs to exactly this path.
    pub http_path: Option<String>,
    /// TLS certificate chain (PEM). Enables TLS together with the key.
    pub https_cert_path: Option<PathBuf>,
    /// TLS private key (PEM).
    pub https_cert_key_path: Option<PathBuf>,
    /// Skip push-message signature validation.
    pub ignore_message_validation: bool,
    /// Extra certificate hosts accepted verbatim (private deployments).
    pub extra_cert_hosts: Vec<String>,
}

impl Default for IngressSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: None,
            http_path: None,
            https_cert_path: None,
            https_cert_key_path: None,
            ignore_message_validation: false,
            extra_cert_hosts: Vec::new(),
        }
    }
}

/// `[subscription]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SubscriptionSection {
    /// Topic to subscribe to at start-up.
    pub topic_arn: Option<String>,
    /// This daemon's externally reachable notification URL.
    pub endpoint: Option<String>,
    /// Leave the subscription in place at shutdown.
    pub ignore_unsubscribe_on_shutdown: bool,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

impl MirrorConfig {
    /// Load from a TOML file, or start from defaults when no path is
    /// given (CLI flags must then fill in the required options).
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("reading {}", p.display()))?;
                let config: MirrorConfig =
                    toml::from_str(&content).with_context(|| format!("parsing {}", p.display()))?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Enforce the cross-option rules. Violations are fatal start-up
    /// errors.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.remote.bucket.is_empty() {
            bail!("remote.bucket is required");
        }
        if self.mirror.root_dir.as_os_str().is_empty() {
            bail!("mirror.root_dir is required");
        }
        if self.remote.max_keys == 0 {
            bail!("remote.max_keys must be at least 1");
        }
        if self.remote.access_key.is_some() != self.remote.secret_key.is_some() {
            bail!("remote.access_key and remote.secret_key must be set together");
        }
        self.normalization_form()?;

        if let Some(path) = &self.ingress.http_path
            && !path.starts_with('/')
        {
            bail!("ingress.http_path must start with '/'");
        }
        if self.ingress.https_cert_path.is_some() != self.ingress.https_cert_key_path.is_some() {
            bail!("ingress.https_cert_path and ingress.https_cert_key_path must be set together");
        }

        if self.subscription.topic_arn.is_some() != self.subscription.endpoint.is_some() {
            bail!("subscription.topic_arn and subscription.endpoint must be set together");
        }
        if self.subscription.topic_arn.is_some() && self.ingress.port.is_none() {
            bail!("subscription.topic_arn requires ingress.port (nowhere to deliver)");
        }
        Ok(())
    }

    /// Parsed normalization form, if configured.
    pub fn normalization_form(&self) -> anyhow::Result<Option<NormalizationForm>> {
        self.mirror
            .normalization_form
            .as_deref()
            .map(|s| s.parse().map_err(anyhow::Error::from))
            .transpose()
    }

    /// The key pipeline bound to this configuration.
    pub fn key_pipeline(&self) -> anyhow::Result<KeyPipeline> {
        Ok(KeyPipeline::from_options(
            PlatformProfile::host(),
            !self.mirror.ignore_key_root_char_replacement,
            !self.mirror.ignore_key_platform_dir_char_replacement,
            self.normalization_form()?,
        ))
    }

    /// Queue configuration.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_concurrency: self.queue.max_concurrency,
            default_task_timeout: (self.queue.task_timeout_ms > 0)
                .then(|| Duration::from_millis(self.queue.task_timeout_ms)),
            reaper_interval: Duration::from_millis(self.queue.reaper_interval_ms.max(10)),
        }
    }

    /// Reconciliation options.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            remove: self.mirror.remove,
            prefix: self.remote.prefix.clone(),
            suffix: self.remote.suffix.clone(),
            max_keys: self.remote.max_keys,
        }
    }

    /// Object-store client configuration.
    pub fn s3_config(&self) -> S3ClientConfig {
        S3ClientConfig {
            bucket: self.remote.bucket.clone(),
            region: self.remote.region.clone(),
            endpoint: self.remote.endpoint.clone(),
            credentials: self.credentials(),
        }
    }

    /// Control-plane client configuration.
    pub fn sns_config(&self) -> SnsClientConfig {
        SnsClientConfig {
            region: self.remote.region.clone(),
            endpoint: None,
            credentials: self.credentials(),
        }
    }

    fn credentials(&self) -> Option<Credentials> {
        match (&self.remote.access_key, &self.remote.secret_key) {
            (Some(access_key_id), Some(secret_access_key)) => Some(Credentials {
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
            }),
            _ => None,
        }
    }

    /// Ingress configuration; `None` when no port is set.
    pub fn ingress_config(&self) -> Option<IngressConfig> {
        let port = self.ingress.port?;
        let tls = match (
            &self.ingress.https_cert_path,
            &self.ingress.https_cert_key_path,
        ) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            }),
            _ => None,
        };
        Some(IngressConfig {
            host: self.ingress.host.clone(),
            port,
            http_path: self.ingress.http_path.clone(),
            tls,
            ..IngressConfig::default()
        })
    }

    /// Subscription configuration; `None` when not requested.
    pub fn subscription_config(&self) -> Option<SubscriptionConfig> {
        let topic_arn = self.subscription.topic_arn.clone()?;
        let endpoint = self.subscription.endpoint.clone()?;
        let protocol = if endpoint.starts_with("https://") {
            "https"
        } else {
            "http"
        };
        Some(SubscriptionConfig {
            topic_arn,
            endpoint,
            protocol: protocol.to_owned(),
        })
    }

    /// Shutdown drain bound.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.shutdown_timeout_ms)
    }
}
