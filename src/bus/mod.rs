//! Notification bus capability.
//!
//! The bus carries "sequence N now exists" wake-ups keyed by topic. Delivery is
//! best-effort: a subscriber that falls behind is dropped and must re-derive
//! its position from the store. [`LocalBus`] is the in-process implementation.
//!
//! # Example
//!
//! ```ignore
//! let bus = LocalBus::new(BusConfig::default());
//! let sub = bus.subscribe("notify.42")?;
//!
//! bus.publish("notify.42", b"1")?;
//! assert_eq!(sub.recv()?, b"1".to_vec());
//! // Dropping `sub` unsubscribes.
//! ```

mod local;

pub use local::{BusConfig, LocalBus};

use crate::error::Result;
use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

/// Publish/subscribe capability consumed by the append engine and the reader.
pub trait NotificationBus: Send + Sync {
    /// Deliver `message` to current subscribers of `topic`.
    fn publish(&self, topic: &str, message: &[u8]) -> Result<()>;

    /// Start buffering messages published to `topic` from now on.
    fn subscribe(&self, topic: &str) -> Result<BusSubscription>;
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Removes a subscription from whatever bus created it.
pub trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, topic: &str, id: SubscriptionId);
}

/// A live subscription. Dropping it unsubscribes.
///
/// The receiver disconnects when the bus drops the subscriber (buffer
/// overflow) or shuts down.
pub struct BusSubscription {
    pub id: SubscriptionId,
    pub topic: String,
    receiver: Receiver<Vec<u8>>,
    owner: Option<Arc<dyn Unsubscribe>>,
}

impl BusSubscription {
    pub fn new(
        id: SubscriptionId,
        topic: impl Into<String>,
        receiver: Receiver<Vec<u8>>,
        owner: Arc<dyn Unsubscribe>,
    ) -> Self {
        Self {
            id,
            topic: topic.into(),
            receiver,
            owner: Some(owner),
        }
    }

    /// Underlying channel, for use in `select!`.
    pub fn receiver(&self) -> &Receiver<Vec<u8>> {
        &self.receiver
    }

    /// Receive the next message (blocking).
    pub fn recv(&self) -> std::result::Result<Vec<u8>, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<Vec<u8>, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<Vec<u8>, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.take() {
            owner.unsubscribe(&self.topic, self.id);
        }
    }
}

impl std::fmt::Debug for BusSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSubscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}
