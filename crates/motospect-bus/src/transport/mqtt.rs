//! MQTT transport (rumqttc)
//!
//! The rumqttc event loop runs in a background task that forwards inbound
//! publishes into a broadcast channel. rumqttc reconnects on the next poll
//! after an error; tracked filters are re-subscribed on every ConnAck.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrokerTransport, InboundMessage, TransportError};

const CHANNEL_CAPACITY: usize = 1024;
const REQUEST_CHANNEL_CAPACITY: usize = 256;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Broker connection parameters
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl MqttSettings {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

pub struct MqttTransport {
    client: AsyncClient,
    tx: broadcast::Sender<InboundMessage>,
    filters: Arc<Mutex<BTreeSet<String>>>,
    closing: Arc<AtomicBool>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Connect and wait for the broker's ConnAck
    pub async fn connect(settings: &MqttSettings) -> Result<Self, TransportError> {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keep_alive);

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        let connack = tokio::time::timeout(settings.connect_timeout, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => continue,
                    Err(e) => return Err(TransportError::ConnectionFailed(e.to_string())),
                }
            }
        })
        .await;

        match connack {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(TransportError::Timeout(format!(
                    "no ConnAck from {}:{} within {:?}",
                    settings.host, settings.port, settings.connect_timeout
                )))
            }
        }

        info!(
            host = %settings.host,
            port = settings.port,
            client_id = %settings.client_id,
            "Connected to MQTT broker"
        );

        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let filters = Arc::new(Mutex::new(BTreeSet::new()));
        let closing = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(run_event_loop(
            event_loop,
            client.clone(),
            tx.clone(),
            filters.clone(),
            closing.clone(),
        ));

        Ok(Self {
            client,
            tx,
            filters,
            closing,
            event_loop: Mutex::new(Some(handle)),
        })
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    tx: broadcast::Sender<InboundMessage>,
    filters: Arc<Mutex<BTreeSet<String>>>,
    closing: Arc<AtomicBool>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let _ = tx.send(InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload,
                });
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                let filters: Vec<String> = filters.lock().iter().cloned().collect();
                info!(filters = filters.len(), "Reconnected to MQTT broker, resubscribing");
                for filter in filters {
                    if let Err(e) = client.try_subscribe(filter.clone(), QoS::AtLeastOnce) {
                        warn!(filter = %filter, error = %e, "Resubscribe failed");
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if closing.load(Ordering::SeqCst) {
                    break;
                }
                warn!(error = %e, "MQTT connection error, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
    debug!("MQTT event loop stopped");
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))
    }

    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        self.filters.lock().insert(filter.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.filters.lock().remove(filter);
        self.client
            .unsubscribe(filter)
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))
    }

    fn incoming(&self) -> broadcast::Receiver<InboundMessage> {
        self.tx.subscribe()
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|_| TransportError::ConnectionClosed);

        let handle = self.event_loop.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(2), handle).await.is_err() {
                warn!("MQTT event loop did not stop in time");
            }
        }
        result
    }
}
