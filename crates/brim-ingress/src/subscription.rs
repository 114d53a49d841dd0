//! Subscription lifecycle: `None → Requested → Confirmed → Unsubscribed`.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use brim_remote::PubSubControl;

use crate::error::IngressError;

/// Where the subscription stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// No subscription requested (or none configured).
    None,
    /// `Subscribe` issued; waiting for the confirmation callback.
    Requested,
    /// Confirmed by the control plane.
    Confirmed,
    /// Unsubscribed during shutdown.
    Unsubscribed,
}

/// What to subscribe at start-up.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Topic to subscribe to.
    pub topic_arn: String,
    /// This daemon's notification endpoint URL.
    pub endpoint: String,
    /// Delivery protocol (`http` or `https`, matching the endpoint).
    pub protocol: String,
}

struct Inner {
    state: SubscriptionState,
    subscription_arn: Option<String>,
}

/// Owns the subscription through the daemon's lifetime. The subscription
/// identifier is written once by [`Subscription::subscribe`] and read
/// only at shutdown.
pub struct Subscription {
    control: Arc<dyn PubSubControl>,
    config: Option<SubscriptionConfig>,
    ignore_unsubscribe_on_shutdown: bool,
    inner: Mutex<Inner>,
}

impl Subscription {
    /// Create the lifecycle holder. With `config` absent every operation
    /// is a no-op (the ingress then only serves already-routed traffic).
    pub fn new(
        control: Arc<dyn PubSubControl>,
        config: Option<SubscriptionConfig>,
        ignore_unsubscribe_on_shutdown: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            control,
            config,
            ignore_unsubscribe_on_shutdown,
            inner: Mutex::new(Inner {
                state: SubscriptionState::None,
                subscription_arn: None,
            }),
        })
    }

    /// Issue `Subscribe`. Called once the listener is bound; a failure
    /// here is fatal for start-up.
    pub async fn subscribe(&self) -> Result<(), IngressError> {
        let Some(config) = &self.config else {
            return Ok(());
        };
        let arn = self
            .control
            .subscribe(&config.topic_arn, &config.endpoint, &config.protocol)
            .await?;
        info!(topic = %config.topic_arn, subscription = %arn, "subscription requested");
        let mut inner = self.lock();
        inner.state = SubscriptionState::Requested;
        inner.subscription_arn = Some(arn);
        Ok(())
    }

    /// Answer a `SubscriptionConfirmation` callback. The confirmation
    /// call runs in the background so the HTTP response is not delayed.
    pub fn confirm_in_background(self: &Arc<Self>, topic_arn: String, token: String) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.control.confirm_subscription(&topic_arn, &token).await {
                Ok(()) => {
                    info!(topic = %topic_arn, "subscription confirmed");
                    this.lock().state = SubscriptionState::Confirmed;
                }
                Err(e) => {
                    warn!(topic = %topic_arn, error = %e, "subscription confirmation failed");
                }
            }
        });
    }

    /// Issue `Unsubscribe` with the stored identifier, unless configured
    /// to leave the subscription behind.
    pub async fn unsubscribe(&self) -> Result<(), IngressError> {
        let (state, arn) = {
            let inner = self.lock();
            (inner.state, inner.subscription_arn.clone())
        };
        let Some(arn) = arn else {
            return Ok(());
        };
        if matches!(
            state,
            SubscriptionState::None | SubscriptionState::Unsubscribed
        ) {
            return Ok(());
        }
        if self.ignore_unsubscribe_on_shutdown {
            info!(subscription = %arn, "leaving subscription in place (configured)");
            return Ok(());
        }
        self.control.unsubscribe(&arn).await?;
        info!(subscription = %arn, "unsubscribed");
        self.lock().state = SubscriptionState::Unsubscribed;
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriptionState {
        self.lock().state
    }

    /// The identifier returned by `Subscribe`, once known.
    pub fn subscription_arn(&self) -> Option<String> {
        self.lock().subscription_arn.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("subscription lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brim_remote::{ControlCall, MemoryPubSub};

    const ARN: &str = "arn:aws:sns:eu-west-1:123:mirror:sub-1";

    fn subscription(
        configured: bool,
        ignore_unsubscribe: bool,
    ) -> (Arc<Subscription>, Arc<MemoryPubSub>) {
        let control = Arc::new(MemoryPubSub::new(ARN));
        let config = configured.then(|| SubscriptionConfig {
            topic_arn: "arn:aws:sns:eu-west-1:123:mirror".into(),
            endpoint: "https://mirror.example:8443/notify".into(),
            protocol: "https".into(),
        });
        let subscription = Subscription::new(
            Arc::clone(&control) as Arc<dyn PubSubControl>,
            config,
            ignore_unsubscribe,
        );
        (subscription, control)
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let (subscription, control) = subscription(true, false);
        assert_eq!(subscription.state(), SubscriptionState::None);

        subscription.subscribe().await.unwrap();
        assert_eq!(subscription.state(), SubscriptionState::Requested);
        assert_eq!(subscription.subscription_arn().as_deref(), Some(ARN));

        subscription.confirm_in_background("arn:topic".into(), "tok".into());
        // The confirmation runs on a spawned task; wait for it to land.
        for _ in 0..50 {
            if subscription.state() == SubscriptionState::Confirmed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(subscription.state(), SubscriptionState::Confirmed);

        subscription.unsubscribe().await.unwrap();
        assert_eq!(subscription.state(), SubscriptionState::Unsubscribed);

        let calls = control.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[2],
            ControlCall::Unsubscribe {
                subscription_arn: ARN.into()
            }
        );
    }

    #[tokio::test]
    async fn test_unconfigured_subscription_is_inert() {
        let (subscription, control) = subscription(false, false);
        subscription.subscribe().await.unwrap();
        subscription.unsubscribe().await.unwrap();
        assert_eq!(subscription.state(), SubscriptionState::None);
        assert!(control.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ignore_unsubscribe_on_shutdown() {
        let (subscription, control) = subscription(true, true);
        subscription.subscribe().await.unwrap();
        subscription.unsubscribe().await.unwrap();

        // Subscribe happened, unsubscribe did not.
        let calls = control.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0], ControlCall::Subscribe { .. }));
    }

    #[tokio::test]
    async fn test_double_unsubscribe_is_single_call() {
        let (subscription, control) = subscription(true, false);
        subscription.subscribe().await.unwrap();
        subscription.unsubscribe().await.unwrap();
        subscription.unsubscribe().await.unwrap();
        let unsubscribes = control
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ControlCall::Unsubscribe { .. }))
            .count();
        assert_eq!(unsubscribes, 1);
    }
}
