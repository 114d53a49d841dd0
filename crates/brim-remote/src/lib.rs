//! Remote-side clients for brim.
//!
//! The mirror core consumes two narrow interfaces: [`ObjectStore`]
//! (paged listing + object fetch) and [`PubSubControl`] (subscription
//! management). This crate defines both traits, HTTP implementations for
//! S3-compatible stores ([`S3Client`]) and SNS-compatible control planes
//! ([`SnsClient`]), and in-memory doubles ([`MemoryStore`],
//! [`MemoryPubSub`]) the test suites run against.

mod error;
mod memory;
mod s3;
mod sign;
mod sns;
mod traits;
mod xml;

pub use error::RemoteError;
pub use memory::{ControlCall, MemoryPubSub, MemoryStore};
pub use s3::{S3Client, S3ClientConfig};
pub use sign::{Credentials, SigV4Signer};
pub use sns::{SnsClient, SnsClientConfig};
pub use traits::{ListPage, ListRequest, ListedObject, ObjectStore, PubSubControl};
