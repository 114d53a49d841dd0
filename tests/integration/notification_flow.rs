//! Subscribe → confirm → notify → unsubscribe, end to end: an in-process
//! ingress router dispatching into a real engine over an in-memory store.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use brim_ingress::{
    Dispatcher, Ingress, IngressConfig, RecordFilter, Subscription, SubscriptionConfig,
    SubscriptionState,
};
use brim_integration_tests::TestMirror;
use brim_remote::{ControlCall, MemoryPubSub, PubSubControl};
use brim_sync::ActionSink;

const TOPIC: &str = "arn:aws:sns:eu-west-1:123:mirror";
const SUB_ARN: &str = "arn:aws:sns:eu-west-1:123:mirror:sub-42";

struct Flow {
    mirror: TestMirror,
    router: Router,
    control: Arc<MemoryPubSub>,
    subscription: Arc<Subscription>,
}

fn flow() -> Flow {
    let mirror = TestMirror::new(true, None);
    let control = Arc::new(MemoryPubSub::new(SUB_ARN));
    let subscription = Subscription::new(
        Arc::clone(&control) as Arc<dyn PubSubControl>,
        Some(SubscriptionConfig {
            topic_arn: TOPIC.into(),
            endpoint: "https://mirror.example:8443/".into(),
            protocol: "https".into(),
        }),
        false,
    );
    let dispatcher = Dispatcher::new(
        Arc::clone(&mirror.engine) as Arc<dyn ActionSink>,
        mirror.engine.pipeline().clone(),
        RecordFilter::for_bucket("mirror-source"),
    );
    let ingress = Ingress::new(
        IngressConfig::default(),
        dispatcher,
        None, // signature validation exercised in brim-ingress unit tests
        Arc::clone(&subscription),
    );
    Flow {
        router: ingress.router(),
        mirror,
        control,
        subscription,
    }
}

async fn post(router: &Router, body: String) -> StatusCode {
    router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
}

fn notification(records: serde_json::Value) -> String {
    serde_json::json!({
        "Type": "Notification",
        "MessageId": "m-1",
        "TopicArn": TOPIC,
        "Timestamp": "2026-03-01T10:00:00Z",
        "Message": records.to_string(),
    })
    .to_string()
}

fn record(event_name: &str, key: &str) -> serde_json::Value {
    serde_json::json!({
        "eventVersion": "2.1",
        "eventName": event_name,
        "s3": {
            "bucket": {"name": "mirror-source"},
            "object": {"key": key, "size": 3}
        }
    })
}

async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn subscribe_confirm_notify_unsubscribe() {
    let f = flow();

    // Start-up: subscribe (normally issued by Ingress::serve after bind).
    f.subscription.subscribe().await.unwrap();
    assert_eq!(f.subscription.state(), SubscriptionState::Requested);

    // The control plane calls back with a confirmation request.
    let confirmation = serde_json::json!({
        "Type": "SubscriptionConfirmation",
        "MessageId": "m-0",
        "Token": "tok-1",
        "TopicArn": TOPIC,
        "Message": "confirm",
        "Timestamp": "2026-03-01T09:59:00Z",
    })
    .to_string();
    assert_eq!(post(&f.router, confirmation).await, StatusCode::OK);
    wait_for("confirmation", || {
        f.subscription.state() == SubscriptionState::Confirmed
    })
    .await;

    // Two creations and one removal arrive. z.txt exists locally from a
    // previous write; 1.txt and a.txt exist remotely.
    f.mirror.seed("1.txt", b"one");
    f.mirror.seed("a.txt", b"aaa");
    std::fs::write(f.mirror.root.join("z.txt"), "stale").unwrap();

    let body = notification(serde_json::json!({
        "Records": [
            record("ObjectCreated:Put", "1.txt"),
            record("ObjectRestore:Completed", "a.txt"),
            record("ObjectRemoved:Delete", "z.txt"),
        ]
    }));
    assert_eq!(post(&f.router, body).await, StatusCode::OK);

    f.mirror.engine.queue().wait_idle().await;
    wait_for("files to settle", || {
        f.mirror.local_files() == vec!["1.txt", "a.txt"]
    })
    .await;

    // Shutdown: one unsubscribe with the stored identifier.
    f.subscription.unsubscribe().await.unwrap();

    let calls = f.control.calls();
    assert_eq!(calls.len(), 3);
    assert!(matches!(&calls[0], ControlCall::Subscribe { topic_arn, .. } if topic_arn == TOPIC));
    assert!(
        matches!(&calls[1], ControlCall::Confirm { token, .. } if token == "tok-1")
    );
    assert_eq!(
        calls[2],
        ControlCall::Unsubscribe {
            subscription_arn: SUB_ARN.into()
        }
    );
}

#[tokio::test]
async fn duplicate_notification_is_idempotent() {
    let f = flow();
    f.mirror.seed("dup.txt", b"abc");

    let body = notification(serde_json::json!({
        "Records": [record("ObjectCreated:Put", "dup.txt")]
    }));
    assert_eq!(post(&f.router, body.clone()).await, StatusCode::OK);
    assert_eq!(post(&f.router, body).await, StatusCode::OK);

    f.mirror.engine.queue().wait_idle().await;
    assert_eq!(f.mirror.local_files(), vec!["dup.txt"]);
    assert_eq!(
        std::fs::read(f.mirror.root.join("dup.txt")).unwrap(),
        b"abc"
    );
}

#[tokio::test]
async fn records_for_other_buckets_are_ignored() {
    let f = flow();
    f.mirror.seed("x.txt", b"x");

    let foreign = serde_json::json!({
        "Records": [{
            "eventVersion": "2.1",
            "eventName": "ObjectCreated:Put",
            "s3": {
                "bucket": {"name": "someone-elses-bucket"},
                "object": {"key": "x.txt", "size": 1}
            }
        }]
    });
    assert_eq!(post(&f.router, notification(foreign)).await, StatusCode::OK);

    f.mirror.engine.queue().wait_idle().await;
    assert!(f.mirror.local_files().is_empty());
}

#[tokio::test]
async fn notification_and_resync_converge_on_the_same_file() {
    // A notification-driven write and a full-sync write for the same key
    // serialize per path; the final state is the remote body either way.
    let f = flow();
    f.mirror.seed("contended.txt", b"final");

    let body = notification(serde_json::json!({
        "Records": [record("ObjectCreated:Put", "contended.txt")]
    }));
    assert_eq!(post(&f.router, body).await, StatusCode::OK);
    f.mirror.engine.full_sync().await.unwrap();

    f.mirror.engine.queue().wait_idle().await;
    assert_eq!(
        std::fs::read(f.mirror.root.join("contended.txt")).unwrap(),
        b"final"
    );
}
