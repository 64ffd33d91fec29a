//! motospect-bus - synchronous calls and events over publish/subscribe
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ServiceNode                           │
//! │  methods, events, health snapshot, discovery announcements  │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │
//! ┌──────────────────────────┴──────────────────────────────────┐
//! │                       ServiceBus                            │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐  │
//! │  │ PendingCalls │  │  Handlers    │  │  Worker pool     │  │
//! │  │ (oneshot)    │  │ (svc,method) │  │  (semaphore)     │  │
//! │  └──────────────┘  └──────────────┘  └──────────────────┘  │
//! │                    ┌───────────────┐                        │
//! │                    │BrokerTransport│                        │
//! │                    │ (MQTT/memory) │                        │
//! │                    └───────────────┘                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod bus;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod health;
pub mod node;
pub mod topics;
pub mod transport;

pub use bus::{BusConfig, ServiceBus};
pub use envelope::{ErrorKind, MessageEnvelope, MessageKind};
pub use error::{BusError, BusResult};
pub use handler::{EventHandler, MethodHandler};
pub use health::HealthInfo;
pub use node::{ServiceNode, ServiceNodeBuilder};
pub use topics::{topic_matches, TopicScheme};
pub use transport::{BrokerTransport, InMemoryBroker, InboundMessage, MemoryTransport, TransportError};

#[cfg(feature = "mqtt")]
pub use transport::{MqttSettings, MqttTransport};
