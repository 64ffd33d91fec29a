//! In-process broker
//!
//! Every connection gets its own broadcast channel; a publish is fanned out
//! to each connection with at least one matching filter. Topics can be
//! marked as dropped to simulate lost messages.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::{BrokerTransport, InboundMessage, TransportError};
use crate::topics::topic_matches;

const CHANNEL_CAPACITY: usize = 1024;

struct ClientSlot {
    client_id: String,
    filters: BTreeSet<String>,
    tx: broadcast::Sender<InboundMessage>,
}

#[derive(Default)]
struct Hub {
    clients: RwLock<HashMap<u64, ClientSlot>>,
    dropped: RwLock<Vec<String>>,
    next_slot: AtomicU64,
}

impl Hub {
    fn route(&self, topic: &str, payload: Bytes) {
        if self.dropped.read().iter().any(|f| topic_matches(f, topic)) {
            debug!(topic = %topic, "Dropping message on filtered topic");
            return;
        }

        let clients = self.clients.read();
        for slot in clients.values() {
            if slot.filters.iter().any(|f| topic_matches(f, topic)) {
                trace!(topic = %topic, client = %slot.client_id, "Delivering message");
                let _ = slot.tx.send(InboundMessage {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                });
            }
        }
    }
}

/// Shared broker; clone it to hand the same broker to several buses
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    hub: Arc<Hub>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection to this broker
    pub fn connect(&self, client_id: impl Into<String>) -> Arc<MemoryTransport> {
        let slot = self.hub.next_slot.fetch_add(1, Ordering::Relaxed);
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        self.hub.clients.write().insert(
            slot,
            ClientSlot {
                client_id: client_id.into(),
                filters: BTreeSet::new(),
                tx,
            },
        );
        Arc::new(MemoryTransport {
            hub: self.hub.clone(),
            slot,
        })
    }

    /// Silently discard every message published to topics matching `filter`
    pub fn drop_topics(&self, filter: impl Into<String>) {
        self.hub.dropped.write().push(filter.into());
    }

    pub fn clear_drops(&self) {
        self.hub.dropped.write().clear();
    }

    /// Number of open connections
    pub fn connections(&self) -> usize {
        self.hub.clients.read().len()
    }
}

/// One connection to an [`InMemoryBroker`]
pub struct MemoryTransport {
    hub: Arc<Hub>,
    slot: u64,
}

impl MemoryTransport {
    /// Filters currently subscribed on this connection
    pub fn filters(&self) -> Vec<String> {
        self.hub
            .clients
            .read()
            .get(&self.slot)
            .map(|s| s.filters.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.hub.clients.read().contains_key(&self.slot) {
            Ok(())
        } else {
            Err(TransportError::ConnectionClosed)
        }
    }
}

#[async_trait]
impl BrokerTransport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.hub.route(topic, Bytes::from(payload));
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        let mut clients = self.hub.clients.write();
        let slot = clients
            .get_mut(&self.slot)
            .ok_or(TransportError::ConnectionClosed)?;
        slot.filters.insert(filter.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        let mut clients = self.hub.clients.write();
        let slot = clients
            .get_mut(&self.slot)
            .ok_or(TransportError::ConnectionClosed)?;
        slot.filters.remove(filter);
        Ok(())
    }

    fn incoming(&self) -> broadcast::Receiver<InboundMessage> {
        match self.hub.clients.read().get(&self.slot) {
            Some(slot) => slot.tx.subscribe(),
            // Closed connection: hand out a receiver whose sender is gone
            None => broadcast::channel(1).1,
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.hub.clients.write().remove(&self.slot);
        Ok(())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.hub.clients.write().remove(&self.slot);
    }
}
