use super::{Listener, Store, Webhook, WebhookError, encode_id};
use async_trait::async_trait;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

/// Opaque producer of an `Authorization` header value. An empty value means
/// no header is attached.
#[async_trait]
pub trait Acquirer: Send + Sync {
    async fn acquire(&self) -> Result<String, WebhookError>;
}

/// Acquirer that always yields the same header value.
pub struct FixedTokenAcquirer {
    value: String,
}

impl FixedTokenAcquirer {
    pub fn new(value: impl Into<String>) -> Self {
        FixedTokenAcquirer {
            value: value.into(),
        }
    }
}

#[async_trait]
impl Acquirer for FixedTokenAcquirer {
    async fn acquire(&self) -> Result<String, WebhookError> {
        Ok(self.value.clone())
    }
}

/// Acquirer for backends that require no authorization.
pub struct NoTokenAcquirer;

#[async_trait]
impl Acquirer for NoTokenAcquirer {
    async fn acquire(&self) -> Result<String, WebhookError> {
        Ok(String::new())
    }
}

#[derive(Clone, Debug)]
pub struct RemoteConfig {
    /// Base URL of the backend, e.g. `http://store.example.com`.
    pub address: String,
    /// Key prefix under which this deployment's subscriptions live.
    pub prefix: String,
    /// Cadence of the background pull.
    pub pull_interval: Duration,
}

/// Remote-backed subscription store, pull model.
///
/// Reads fetch `GET {address}/store/{prefix}` and parse the `{id ->
/// subscription}` object best-effort: malformed entries are skipped, not
/// fatal. Writes go to `POST`/`DELETE {address}/store/{prefix}/{id}` with
/// base64url-encoded ids. Non-200 statuses surface as errors and are never
/// retried here.
///
/// A background ticker pulls every `pull_interval` and hands the snapshot to
/// the registered listener.
pub struct RemoteStore {
    inner: Arc<RemoteInner>,
    puller: Mutex<Option<JoinHandle<()>>>,
}

struct RemoteInner {
    client: reqwest::Client,
    address: String,
    prefix: String,
    auth: Arc<dyn Acquirer>,
    listener: Mutex<Option<Arc<dyn Listener>>>,
}

impl RemoteStore {
    pub fn new(config: RemoteConfig, auth: Arc<dyn Acquirer>) -> Arc<Self> {
        let inner = Arc::new(RemoteInner {
            client: reqwest::Client::new(),
            address: config.address.trim_end_matches('/').to_string(),
            prefix: config.prefix,
            auth,
            listener: Mutex::new(None),
        });

        let puller = spawn_puller(Arc::downgrade(&inner), config.pull_interval);

        Arc::new(RemoteStore {
            inner,
            puller: Mutex::new(Some(puller)),
        })
    }
}

fn spawn_puller(inner: Weak<RemoteInner>, pull_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        // first pull happens one full interval after startup
        let mut ticker = interval_at(Instant::now() + pull_interval, pull_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else { return };

            let listener = inner.listener.lock().clone();
            let Some(listener) = listener else { continue };

            match inner.fetch().await {
                Ok(webhooks) => listener.update(webhooks),
                Err(e) => {
                    tracing::error!(error = %e, "failed to pull webhooks from remote store");
                }
            }
        }
    })
}

impl RemoteInner {
    fn collection_url(&self) -> String {
        format!("{}/store/{}", self.address, self.prefix)
    }

    fn entry_url(&self, id: &str) -> String {
        format!("{}/store/{}/{}", self.address, self.prefix, encode_id(id))
    }

    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, WebhookError> {
        let auth = self.auth.acquire().await?;
        if auth.is_empty() {
            Ok(request)
        } else {
            Ok(request.header(AUTHORIZATION, auth))
        }
    }

    async fn fetch(&self) -> Result<Vec<Webhook>, WebhookError> {
        let request = self.authorize(self.client.get(self.collection_url())).await?;
        let response = request.send().await?;

        if response.status().as_u16() != 200 {
            return Err(WebhookError::RemoteStatus(response.status().as_u16()));
        }

        let body: HashMap<String, serde_json::Value> = response.json().await?;

        let mut webhooks = Vec::with_capacity(body.len());
        for (id, value) in body {
            match serde_json::from_value::<Webhook>(value) {
                Ok(webhook) => webhooks.push(webhook),
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "skipping malformed subscription");
                }
            }
        }

        Ok(webhooks)
    }
}

#[async_trait]
impl Store for RemoteStore {
    async fn push(&self, webhook: Webhook) -> Result<(), WebhookError> {
        let body = serde_json::to_vec(&webhook)?;

        let request = self
            .inner
            .authorize(
                self.inner
                    .client
                    .post(self.inner.entry_url(webhook.id()))
                    .header(CONTENT_TYPE, "application/json")
                    .body(body),
            )
            .await?;
        let response = request.send().await?;

        if response.status().as_u16() != 200 {
            return Err(WebhookError::RemoteStatus(response.status().as_u16()));
        }

        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), WebhookError> {
        let request = self
            .inner
            .authorize(self.inner.client.delete(self.inner.entry_url(id)))
            .await?;
        let response = request.send().await?;

        if response.status().as_u16() != 200 {
            return Err(WebhookError::RemoteStatus(response.status().as_u16()));
        }

        Ok(())
    }

    async fn get_webhooks(&self) -> Result<Vec<Webhook>, WebhookError> {
        self.inner.fetch().await
    }

    fn set_listener(&self, listener: Arc<dyn Listener>) -> Result<(), WebhookError> {
        *self.inner.listener.lock() = Some(listener);
        Ok(())
    }

    async fn stop(&self) {
        if let Some(puller) = self.puller.lock().take() {
            puller.abort();
        }
    }
}
