//! Notifier interface
//!
//! Delivery of human-readable events lives outside this crate. Business
//! operations never call a [`Notifier`] directly; they enqueue on the
//! [`NotificationOutbox`], which retries and dead-letters in the background.

pub mod outbox;

pub use outbox::{DeadLetter, NotificationOutbox};

use crate::types::AccountId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: AccountId,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Notification {
    pub fn new(recipient: AccountId, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipient,
            title: title.into(),
            body: body.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("recipient unreachable: {0}")]
    Unreachable(AccountId),
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log; the default when no transport is wired
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait::async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            recipient = %notification.recipient,
            title = %notification.title,
            metadata = ?notification.metadata,
            "{}",
            notification.body
        );
        Ok(())
    }
}
