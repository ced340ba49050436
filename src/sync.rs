//! Best-effort invalidation channel between processes.
//!
//! Delivery is at-most-once. A lost message is healed by the entry's own TTL,
//! so nothing here replaces expiry.
//!
//! Every broadcast is tagged with the sender's origin id and endpoints never
//! hand their own messages back to their handlers. A writer therefore keeps
//! the value it just stored instead of evicting it when its own broadcast
//! comes around.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Callback invoked with the key of every foreign invalidation.
pub type InvalidationHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Wire format of an invalidation broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// Id of the endpoint that published the message.
    pub origin: String,
    /// Cache key to drop.
    pub key: String,
}

impl InvalidationMessage {
    /// Serializes the message for the channel.
    pub fn encode(&self) -> Result<String> {
        crate::codec::encode(self)
    }

    /// Parses a channel payload.
    pub fn decode(payload: &str) -> Result<Self> {
        crate::codec::decode(payload)
    }
}

/// Publish/subscribe seam for cache invalidation.
#[async_trait]
pub trait CacheSync: Send + Sync {
    /// Origin id stamped on this endpoint's broadcasts.
    fn origin(&self) -> &str;

    /// Publishes an invalidation for `key` on `channel`.
    async fn broadcast_invalidation(&self, channel: &str, key: &str) -> Result<()>;

    /// Registers a handler for invalidations published by other endpoints.
    fn subscribe_invalidation(&self, channel: &str, handler: InvalidationHandler) -> Result<()>;
}

/// Absent channel: broadcasts go nowhere, subscriptions never fire.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSync;

#[async_trait]
impl CacheSync for NoSync {
    fn origin(&self) -> &str {
        "local"
    }

    async fn broadcast_invalidation(&self, _channel: &str, _key: &str) -> Result<()> {
        Ok(())
    }

    fn subscribe_invalidation(&self, _channel: &str, _handler: InvalidationHandler) -> Result<()> {
        Ok(())
    }
}

/// In-process pub/sub hub. Each [`LocalBus::endpoint`] acts as one process.
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<LocalBusInner>,
}

#[derive(Default)]
struct LocalBusInner {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    dropping: AtomicBool,
}

#[derive(Clone)]
struct Subscriber {
    origin: String,
    handler: InvalidationHandler,
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBus").finish_non_exhaustive()
    }
}

impl LocalBus {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an endpoint with a fresh origin id.
    pub fn endpoint(&self) -> LocalSync {
        LocalSync {
            bus: self.clone(),
            origin: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// When set, every published message is silently lost.
    pub fn set_dropping(&self, dropping: bool) {
        self.inner.dropping.store(dropping, Ordering::Relaxed);
    }

    fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        if self.inner.dropping.load(Ordering::Relaxed) {
            tracing::debug!(channel = %channel, "invalidation dropped");
            return Ok(());
        }
        let message = InvalidationMessage::decode(payload)?;
        let subscribers = {
            let guard = self.inner.subscribers.lock().expect("poisoned lock");
            guard.get(channel).cloned().unwrap_or_default()
        };
        for subscriber in subscribers {
            if subscriber.origin != message.origin {
                (subscriber.handler)(&message.key);
            }
        }
        Ok(())
    }
}

/// One endpoint on a [`LocalBus`].
#[derive(Debug, Clone)]
pub struct LocalSync {
    bus: LocalBus,
    origin: String,
}

#[async_trait]
impl CacheSync for LocalSync {
    fn origin(&self) -> &str {
        &self.origin
    }

    async fn broadcast_invalidation(&self, channel: &str, key: &str) -> Result<()> {
        let payload = InvalidationMessage {
            origin: self.origin.clone(),
            key: key.to_string(),
        }
        .encode()?;
        self.bus.publish(channel, &payload)
    }

    fn subscribe_invalidation(&self, channel: &str, handler: InvalidationHandler) -> Result<()> {
        let mut guard = self.bus.inner.subscribers.lock().expect("poisoned lock");
        guard
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber {
                origin: self.origin.clone(),
                handler,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn recorder() -> (InvalidationHandler, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: InvalidationHandler = Arc::new(move |key: &str| {
            sink.lock().unwrap().push(key.to_string());
        });
        (handler, seen)
    }

    #[test]
    fn peers_should_receive_but_sender_should_not() {
        let bus = LocalBus::new();
        let a = bus.endpoint();
        let b = bus.endpoint();
        let (handler_a, seen_a) = recorder();
        let (handler_b, seen_b) = recorder();
        a.subscribe_invalidation("chan", handler_a).unwrap();
        b.subscribe_invalidation("chan", handler_b).unwrap();

        block_on(a.broadcast_invalidation("chan", "k1")).unwrap();

        assert!(seen_a.lock().unwrap().is_empty());
        assert_eq!(*seen_b.lock().unwrap(), vec!["k1".to_string()]);
    }

    #[test]
    fn channels_should_be_isolated() {
        let bus = LocalBus::new();
        let a = bus.endpoint();
        let b = bus.endpoint();
        let (handler, seen) = recorder();
        b.subscribe_invalidation("roles", handler).unwrap();

        block_on(a.broadcast_invalidation("permissions", "k1")).unwrap();

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn dropping_bus_should_lose_messages() {
        let bus = LocalBus::new();
        let a = bus.endpoint();
        let b = bus.endpoint();
        let (handler, seen) = recorder();
        b.subscribe_invalidation("chan", handler).unwrap();
        bus.set_dropping(true);

        block_on(a.broadcast_invalidation("chan", "k1")).unwrap();

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn message_should_encode_origin_and_key() {
        let message = InvalidationMessage {
            origin: "p1".to_string(),
            key: "u1:VIEW::".to_string(),
        };
        let raw = message.encode().unwrap();
        assert_eq!(raw, r#"{"origin":"p1","key":"u1:VIEW::"}"#);
        assert_eq!(InvalidationMessage::decode(&raw).unwrap(), message);
    }
}
