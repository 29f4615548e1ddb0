//! Blob storage for uploaded inputs and produced outputs.
//!
//! Objects are written once under keys scoped by job id and never modified in
//! place. Every completed write emits an [`ObjectCreated`] event to the
//! subscriptions whose [`NotificationRule`] matches the key; that event is the
//! only thing that starts a conversion.

pub mod fs;
pub mod keys;
pub mod presign;

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use fs::FsObjectStore;
pub use presign::SignedQuery;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCreated {
    pub bucket: String,
    pub key: String,
    pub size: u64,
}

/// Key filter for event delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRule {
    pub prefix: String,
    pub suffix: Option<String>,
}

impl NotificationRule {
    pub fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
            && self
                .suffix
                .as_deref()
                .map_or(true, |suffix| key.ends_with(suffix))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("access denied: {0}")]
    Forbidden(&'static str),
    #[error("failed to sign url: {0}")]
    Sign(String),
    #[error("object store io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), ObjectStoreError>;

    /// Stores the contents of a local file under `key`.
    async fn put_file(&self, key: &str, path: &Path) -> Result<(), ObjectStoreError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError>;

    /// Copies an object to a local path, returning its size.
    async fn download_to(&self, key: &str, path: &Path) -> Result<u64, ObjectStoreError>;

    /// A time-limited URL that fetches `key` as an attachment named
    /// `filename`.
    fn presign(&self, key: &str, ttl: Duration, filename: &str) -> Result<String, ObjectStoreError>;

    fn verify_presigned(&self, key: &str, query: &SignedQuery) -> Result<(), ObjectStoreError>;

    /// Delivers an event for every future object write matching any of
    /// `rules`.
    fn subscribe(&self, rules: Vec<NotificationRule>) -> mpsc::UnboundedReceiver<ObjectCreated>;
}
