//! Notification ingress for brim.
//!
//! An axum server receives SNS-style push messages over HTTP(S), verifies
//! their signatures, and dispatches the S3 event records they carry into
//! the same action sink the reconciler uses. The crate also owns the
//! subscription lifecycle: subscribe after bind, confirm on the
//! `SubscriptionConfirmation` callback, unsubscribe at shutdown.

mod dispatch;
mod envelope;
mod error;
mod server;
mod subscription;
mod verify;

pub use dispatch::{DispatchStats, Dispatcher, RecordFilter};
pub use envelope::{Envelope, S3Event, S3EventRecord, decode_object_key};
pub use error::IngressError;
pub use server::{Ingress, IngressConfig, TlsConfig};
pub use subscription::{Subscription, SubscriptionConfig, SubscriptionState};
pub use verify::MessageVerifier;
