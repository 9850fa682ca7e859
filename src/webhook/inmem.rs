use super::{Listener, Store, Webhook, WebhookError};
use crate::metrics_defs::WEBHOOKS_LIVE;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};

#[derive(Clone, Copy, Debug)]
pub struct InMemConfig {
    /// Lifetime of a subscription from its most recent push.
    pub ttl: Duration,
    /// Sweep cadence for expired entries.
    pub check_interval: Duration,
}

/// In-memory TTL-indexed subscription store.
///
/// A background sweeper removes expired entries every `check_interval` and
/// notifies the listener when anything was removed. Snapshots handed to the
/// listener are independent copies.
///
/// The store is itself a [`Listener`], so a backend store (remote pull
/// client, say) can feed it snapshots; see [`InMemStore::with_backend`].
pub struct InMemStore {
    inner: Arc<Inner>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    ttl: Duration,
    backend: Option<Arc<dyn Store>>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    listener: Option<Arc<dyn Listener>>,
}

struct Entry {
    webhook: Webhook,
    expires_at: Instant,
}

impl State {
    fn live_snapshot(&self, now: Instant) -> Vec<Webhook> {
        self.entries
            .values()
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.webhook.clone())
            .collect()
    }
}

impl InMemStore {
    pub fn new(config: InMemConfig) -> Arc<Self> {
        Self::with_backend(config, None)
    }

    /// Builds a store that writes through to `backend` on push/remove. The
    /// backend and the cache communicate only by snapshot: register the
    /// returned store as the backend's listener to complete the pairing.
    pub fn with_backend(config: InMemConfig, backend: Option<Arc<dyn Store>>) -> Arc<Self> {
        let inner = Arc::new(Inner {
            ttl: config.ttl,
            backend,
            state: Mutex::new(State::default()),
        });

        let sweeper = spawn_sweeper(Arc::downgrade(&inner), config.check_interval);

        Arc::new(InMemStore {
            inner,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }
}

fn spawn_sweeper(inner: Weak<Inner>, check_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else { return };
            inner.sweep();
        }
    })
}

impl Inner {
    fn sweep(&self) {
        let (snapshot, listener) = {
            let mut state = self.state.lock();
            let now = Instant::now();

            let before = state.entries.len();
            state.entries.retain(|_, entry| entry.expires_at > now);
            if state.entries.len() == before {
                return;
            }

            metrics::gauge!(WEBHOOKS_LIVE.name).set(state.entries.len() as f64);
            (state.live_snapshot(now), state.listener.clone())
        };

        if let Some(listener) = listener {
            listener.update(snapshot);
        }
    }
}

#[async_trait]
impl Store for InMemStore {
    async fn push(&self, webhook: Webhook) -> Result<(), WebhookError> {
        let (snapshot, listener) = {
            let mut state = self.inner.state.lock();
            let now = Instant::now();

            state.entries.insert(
                webhook.id().to_string(),
                Entry {
                    webhook: webhook.clone(),
                    expires_at: now + self.inner.ttl,
                },
            );

            metrics::gauge!(WEBHOOKS_LIVE.name).set(state.entries.len() as f64);
            (state.live_snapshot(now), state.listener.clone())
        };

        if let Some(backend) = &self.inner.backend {
            backend.push(webhook).await?;
        }

        if let Some(listener) = listener {
            listener.update(snapshot);
        }

        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), WebhookError> {
        let notify = {
            let mut state = self.inner.state.lock();
            let removed = state.entries.remove(id).is_some();

            if removed {
                metrics::gauge!(WEBHOOKS_LIVE.name).set(state.entries.len() as f64);
                Some((state.live_snapshot(Instant::now()), state.listener.clone()))
            } else {
                None
            }
        };

        if let Some(backend) = &self.inner.backend {
            backend.remove(id).await?;
        }

        if let Some((snapshot, listener)) = notify {
            if let Some(listener) = listener {
                listener.update(snapshot);
            }
        }

        Ok(())
    }

    async fn get_webhooks(&self) -> Result<Vec<Webhook>, WebhookError> {
        let state = self.inner.state.lock();
        Ok(state.live_snapshot(Instant::now()))
    }

    fn set_listener(&self, listener: Arc<dyn Listener>) -> Result<(), WebhookError> {
        self.inner.state.lock().listener = Some(listener);
        Ok(())
    }

    async fn stop(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
    }
}

impl Listener for InMemStore {
    /// Re-ingests a backend snapshot, replacing the live set and restarting
    /// every entry's TTL. The registered listener is only notified when the
    /// set actually changed.
    fn update(&self, webhooks: Vec<Webhook>) {
        let notify = {
            let mut state = self.inner.state.lock();
            let now = Instant::now();

            let current: HashMap<&str, &Webhook> = state
                .entries
                .values()
                .filter(|entry| entry.expires_at > now)
                .map(|entry| (entry.webhook.id(), &entry.webhook))
                .collect();
            let incoming: HashMap<&str, &Webhook> =
                webhooks.iter().map(|w| (w.id(), w)).collect();
            let changed = current != incoming;

            let expires_at = now + self.inner.ttl;
            state.entries = webhooks
                .into_iter()
                .map(|webhook| {
                    (
                        webhook.id().to_string(),
                        Entry {
                            webhook,
                            expires_at,
                        },
                    )
                })
                .collect();

            metrics::gauge!(WEBHOOKS_LIVE.name).set(state.entries.len() as f64);
            changed.then(|| (state.live_snapshot(now), state.listener.clone()))
        };

        if let Some((snapshot, listener)) = notify {
            if let Some(listener) = listener {
                listener.update(snapshot);
            }
        }
    }
}
