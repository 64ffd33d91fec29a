//! Broker transports
//!
//! The bus only needs publish, subscribe and a stream of inbound messages:
//! - MQTT via rumqttc (feature `mqtt`)
//! - An in-process broker for tests and single-process deployments

pub mod error;
pub mod memory;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use error::TransportError;
pub use memory::{InMemoryBroker, MemoryTransport};

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttSettings, MqttTransport};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

/// Message delivered by the broker on a subscribed topic
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Publish/subscribe connection to a broker
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Subscribe to a topic filter (`+` / `#` wildcards)
    async fn subscribe(&self, filter: &str) -> Result<(), TransportError>;

    async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError>;

    /// Receiver for every message matching this connection's subscriptions
    ///
    /// Each message is delivered once per connection even when several
    /// filters match it, as far as the broker allows.
    fn incoming(&self) -> broadcast::Receiver<InboundMessage>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
