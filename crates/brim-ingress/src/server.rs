//! The notification HTTP(S) server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{StatusCode, Uri};
use axum::routing::post;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use tracing::{debug, info};

use crate::dispatch::Dispatcher;
use crate::envelope::{Envelope, S3Event};
use crate::error::IngressError;
use crate::subscription::Subscription;
use crate::verify::MessageVerifier;

/// TLS material for the listener.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// PEM certificate chain.
    pub cert_path: PathBuf,
    /// PEM private key.
    pub key_path: PathBuf,
}

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct IngressConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// When set, only POSTs to exactly this path are accepted; other
    /// paths answer 404.
    pub http_path: Option<String>,
    /// Enable TLS termination.
    pub tls: Option<TlsConfig>,
    /// Reject request bodies larger than this.
    pub max_body_bytes: usize,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 0,
            http_path: None,
            tls: None,
            max_body_bytes: 1024 * 1024,
        }
    }
}

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
    /// `None` when message validation is disabled.
    verifier: Option<Arc<MessageVerifier>>,
    subscription: Arc<Subscription>,
    http_path: Option<String>,
}

/// The notification ingress server.
pub struct Ingress {
    config: IngressConfig,
    state: AppState,
}

impl Ingress {
    /// Assemble the ingress. Pass `verifier: None` to skip signature
    /// validation (`ignore_message_validation`).
    pub fn new(
        config: IngressConfig,
        dispatcher: Dispatcher,
        verifier: Option<MessageVerifier>,
        subscription: Arc<Subscription>,
    ) -> Self {
        let http_path = config.http_path.clone();
        Self {
            state: AppState {
                dispatcher: Arc::new(dispatcher),
                verifier: verifier.map(Arc::new),
                subscription,
                http_path,
            },
            config,
        }
    }

    /// Build the router (also used by in-process tests).
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", post(handle_post))
            .route("/{*path}", post(handle_post))
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .with_state(self.state.clone())
    }

    /// Bind, subscribe, and serve until `shutdown` resolves.
    ///
    /// The subscribe call goes out only after the listener is accepting
    /// connections, so the confirmation callback cannot race the bind. A
    /// bind or subscribe failure is returned (fatal for start-up).
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), IngressError> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| IngressError::Config(format!("bind address: {e}")))?;

        let router = self.router();
        let handle = Handle::new();

        {
            let handle = handle.clone();
            tokio::spawn(async move {
                shutdown.await;
                handle.graceful_shutdown(Some(Duration::from_secs(10)));
            });
        }

        let server = {
            let handle = handle.clone();
            match &self.config.tls {
                Some(tls) => {
                    let rustls =
                        RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path).await?;
                    tokio::spawn(async move {
                        axum_server::bind_rustls(addr, rustls)
                            .handle(handle)
                            .serve(router.into_make_service())
                            .await
                    })
                }
                None => tokio::spawn(async move {
                    axum_server::bind(addr)
                        .handle(handle)
                        .serve(router.into_make_service())
                        .await
                }),
            }
        };

        let Some(bound) = handle.listening().await else {
            return match server.await {
                Ok(Err(e)) => Err(e.into()),
                _ => Err(IngressError::Config("listener failed to start".into())),
            };
        };
        info!(
            addr = %bound,
            tls = self.config.tls.is_some(),
            "notification ingress listening"
        );

        self.state.subscription.subscribe().await?;

        match server.await {
            Ok(result) => result.map_err(Into::into),
            Err(e) => Err(IngressError::Config(format!("server task failed: {e}"))),
        }
    }
}

/// One POST = one envelope. 200 on success; parse and signature failures
/// answer 500 through [`IngressError::into_response`].
async fn handle_post(
    State(state): State<AppState>,
    uri: Uri,
    body: Bytes,
) -> Result<StatusCode, IngressError> {
    if let Some(path) = &state.http_path
        && uri.path() != path
    {
        debug!(path = uri.path(), expected = %path, "POST outside ingress path");
        return Ok(StatusCode::NOT_FOUND);
    }

    let envelope: Envelope = serde_json::from_slice(&body)
        .map_err(|e| IngressError::Parse(format!("envelope: {e}")))?;

    if let Some(verifier) = &state.verifier {
        verifier.verify(&envelope).await?;
    }

    match envelope {
        Envelope::SubscriptionConfirmation(m) => {
            info!(topic = %m.topic_arn, "subscription confirmation received");
            state.subscription.confirm_in_background(m.topic_arn, m.token);
        }
        Envelope::UnsubscribeConfirmation(m) => {
            info!(topic = %m.topic_arn, "unsubscribe confirmed by control plane");
        }
        Envelope::Notification(m) => {
            let event: S3Event = serde_json::from_str(&m.message)
                .map_err(|e| IngressError::Parse(format!("inner message: {e}")))?;
            let stats = state.dispatcher.dispatch(&event)?;
            debug!(
                message_id = %m.message_id,
                writes = stats.writes,
                removals = stats.removals,
                skipped = stats.skipped,
                "notification dispatched"
            );
        }
    }

    Ok(StatusCode::OK)
}
