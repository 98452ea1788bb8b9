//! In-process notification bus.

use super::{BusSubscription, NotificationBus, SubscriptionId, Unsubscribe};
use crate::error::{Result, StreamError};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Bus configuration.
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Max buffered messages per subscriber before it is dropped.
    /// Default: 1000
    pub buffer_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

/// Subscribers of one topic.
type Topic = HashMap<SubscriptionId, Sender<Vec<u8>>>;

struct Inner {
    topics: RwLock<HashMap<String, Topic>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
    config: BusConfig,
}

impl Unsubscribe for Inner {
    fn unsubscribe(&self, topic: &str, id: SubscriptionId) {
        let mut topics = self.topics.write();
        if let Some(subs) = topics.get_mut(topic) {
            subs.remove(&id);
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

/// Topic-keyed pub/sub with bounded per-subscriber buffers.
///
/// Cloning shares the same bus.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<Inner>,
}

impl LocalBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .read()
            .get(topic)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Disconnect every subscriber and refuse further traffic.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        let dropped: usize = self
            .inner
            .topics
            .write()
            .drain()
            .map(|(_, subs)| subs.len())
            .sum();
        debug!(dropped, "Notification bus shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            Err(StreamError::BusUnavailable("bus has been shut down".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl NotificationBus for LocalBus {
    fn publish(&self, topic: &str, message: &[u8]) -> Result<()> {
        self.ensure_running()?;

        let mut to_remove = Vec::new();
        {
            let topics = self.inner.topics.read();
            let Some(subs) = topics.get(topic) else {
                trace!(topic, "No subscribers");
                return Ok(());
            };
            for (id, sender) in subs {
                match sender.try_send(message.to_vec()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        debug!(topic, subscription = id.0, "Dropping slow subscriber");
                        to_remove.push(*id);
                    }
                    Err(TrySendError::Disconnected(_)) => to_remove.push(*id),
                }
            }
        }

        // Removing the sender disconnects the subscriber's receiver.
        for id in to_remove {
            self.inner.unsubscribe(topic, id);
        }

        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<BusSubscription> {
        self.ensure_running()?;

        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.inner.config.buffer_size);

        self.inner
            .topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .insert(id, sender);

        trace!(topic, subscription = id.0, "Subscribed");
        let owner: Arc<dyn Unsubscribe> = self.inner.clone();
        Ok(BusSubscription::new(id, topic, receiver, owner))
    }
}
