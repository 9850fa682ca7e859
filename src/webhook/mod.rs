pub mod inmem;
pub mod remote;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during webhook store operations
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote store returned status {0}")]
    RemoteStatus(u16),

    #[error("failed to serialize subscription: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid subscription id: {0}")]
    InvalidId(String),

    #[error("failed to acquire authorization: {0}")]
    Acquire(String),
}

/// A webhook subscription. Identity derives from the delivery URL: pushing a
/// subscription with an existing id replaces all of its fields.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Webhook {
    pub config: DeliveryConfig,

    /// Event regexes this subscription wants delivered.
    #[serde(default)]
    pub events: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<Matcher>,

    /// Requested registration lifetime in seconds.
    #[serde(default)]
    pub duration: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,

    /// Address the registration arrived from.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DeliveryConfig {
    pub url: String,

    pub content_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    #[serde(rename = "alt_urls", default, skip_serializing_if = "Option::is_none")]
    pub alternative_urls: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Matcher {
    #[serde(default)]
    pub device_id: Vec<String>,
}

impl Webhook {
    pub fn id(&self) -> &str {
        &self.config.url
    }
}

/// Encodes a subscription id for use as a URL path segment.
pub fn encode_id(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(id)
}

pub fn decode_id(encoded: &str) -> Result<String, WebhookError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| WebhookError::InvalidId(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| WebhookError::InvalidId(e.to_string()))
}

/// Consumer of subscription-snapshot updates. Each update carries a full,
/// fresh snapshot, never a delta; the store retains no reference to it.
pub trait Listener: Send + Sync {
    fn update(&self, webhooks: Vec<Webhook>);
}

/// Adapter so plain closures can serve as listeners.
pub struct ListenerFunc<F>(pub F);

impl<F> Listener for ListenerFunc<F>
where
    F: Fn(Vec<Webhook>) + Send + Sync,
{
    fn update(&self, webhooks: Vec<Webhook>) {
        (self.0)(webhooks)
    }
}

/// Shared contract of the subscription store variants.
#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts or replaces the subscription keyed by its id and resets its
    /// expiry.
    async fn push(&self, webhook: Webhook) -> Result<(), WebhookError>;

    /// Deletes the subscription if present; idempotent.
    async fn remove(&self, id: &str) -> Result<(), WebhookError>;

    /// Returns a snapshot of the currently live subscriptions.
    async fn get_webhooks(&self) -> Result<Vec<Webhook>, WebhookError>;

    /// Registers a listener, replacing any previous one.
    fn set_listener(&self, listener: Arc<dyn Listener>) -> Result<(), WebhookError>;

    /// Halts background tasks; idempotent.
    async fn stop(&self);
}
