//! Service bus - remote calls and events over a pub/sub broker
//!
//! ```text
//!   caller                         broker                        host
//!     │  REQUEST services/S/M  ──────▶  ──────────────────────▶   │
//!     │  (response_topic = responses/ID)                          │ handler
//!     │  ◀──────────────────────  ◀──────  RESPONSE responses/ID  │
//!     │  (correlation_id = ID)                                    │
//! ```
//!
//! Each outstanding call owns a oneshot rendezvous keyed by its request id.
//! The delivery loop resolves it when the correlated response arrives; the
//! entry is removed on every exit path by a drop guard.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::envelope::{ErrorKind, MessageEnvelope, MessageKind};
use crate::error::{BusError, BusResult};
use crate::handler::{EventHandler, MethodHandler};
use crate::health::{HealthInfo, HealthState};
use crate::topics::TopicScheme;
use crate::transport::{BrokerTransport, InboundMessage};

/// Request ids remembered for duplicate suppression
const SEEN_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Prefix of every topic
    pub base_topic: String,
    /// Identifier used for broker connections and logs
    pub client_id: String,
    /// Concurrent request/event handler executions
    pub max_workers: usize,
    /// Timeout used by `ServiceNode::call_service`
    pub default_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            base_topic: "motospect".to_string(),
            client_id: format!("motospect-{}", &Uuid::new_v4().simple().to_string()[..8]),
            max_workers: 10,
            default_timeout: Duration::from_secs(30),
        }
    }
}

type PendingCalls = Mutex<HashMap<String, oneshot::Sender<MessageEnvelope>>>;

/// Removes a pending call entry when the call finishes, times out or is dropped
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: String,
}

impl<'a> PendingGuard<'a> {
    fn register(
        pending: &'a PendingCalls,
        id: String,
    ) -> (Self, oneshot::Receiver<MessageEnvelope>) {
        let (tx, rx) = oneshot::channel();
        pending.lock().insert(id.clone(), tx);
        (Self { pending, id }, rx)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// Bounded memory of handled request ids
struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl SeenIds {
    fn new() -> Self {
        Self {
            order: VecDeque::with_capacity(SEEN_CAPACITY),
            ids: HashSet::with_capacity(SEEN_CAPACITY),
        }
    }

    /// Returns false if the id was already seen
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == SEEN_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }
}

/// State shared between the public handle and the delivery loop
struct Router {
    topics: TopicScheme,
    transport: Arc<dyn BrokerTransport>,
    handlers: RwLock<HashMap<(String, String), Arc<dyn MethodHandler>>>,
    event_handlers: RwLock<HashMap<(String, String), Vec<Arc<dyn EventHandler>>>>,
    hosted: RwLock<HashMap<String, Arc<RwLock<HealthState>>>>,
    pending: PendingCalls,
    seen: Mutex<SeenIds>,
    workers: Arc<Semaphore>,
}

impl Router {
    fn start_listener(
        self: &Arc<Self>,
        mut incoming: broadcast::Receiver<InboundMessage>,
    ) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            loop {
                match incoming.recv().await {
                    Ok(msg) => router.dispatch(msg),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Bus listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Broker channel closed, bus listener stopping");
                        break;
                    }
                }
            }
        })
    }

    fn dispatch(self: &Arc<Self>, msg: InboundMessage) {
        let envelope = match MessageEnvelope::from_slice(&msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(topic = %msg.topic, error = %e, "Discarding malformed message");
                return;
            }
        };

        match envelope.kind {
            MessageKind::Request => self.handle_request(envelope),
            MessageKind::Response => self.handle_response(envelope),
            MessageKind::Event => self.handle_event(envelope),
            MessageKind::HealthCheck => self.handle_health_check(envelope),
        }
    }

    fn handle_request(self: &Arc<Self>, request: MessageEnvelope) {
        let key = (request.service_name.clone(), request.method.clone());
        let handler = self.handlers.read().get(&key).cloned();
        let hosted = self.hosted.read().contains_key(&request.service_name);

        if handler.is_none() && !hosted {
            // Another process owns this service
            return;
        }
        if !self.seen.lock().insert(&request.message_id) {
            debug!(id = %request.message_id, "Ignoring duplicate request");
            return;
        }

        let router = self.clone();
        let Some(handler) = handler else {
            warn!(
                service = %request.service_name,
                method = %request.method,
                "No handler for method"
            );
            let reply = MessageEnvelope::error_to(
                &request,
                ErrorKind::HandlerMissing,
                format!("No handler for method '{}'", request.method),
            );
            tokio::spawn(async move { router.reply(&request, reply).await });
            return;
        };

        tokio::spawn(async move {
            let Ok(_permit) = router.workers.clone().acquire_owned().await else {
                return;
            };

            let outcome = AssertUnwindSafe(handler.call(request.payload.clone()))
                .catch_unwind()
                .await;
            let reply = match outcome {
                Ok(Ok(value)) => MessageEnvelope::response_to(&request, value),
                Ok(Err(e)) => {
                    warn!(
                        service = %request.service_name,
                        method = %request.method,
                        error = %e,
                        "Handler failed"
                    );
                    MessageEnvelope::error_to(&request, ErrorKind::HandlerError, format!("{:#}", e))
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(
                        service = %request.service_name,
                        method = %request.method,
                        panic = %message,
                        "Handler panicked"
                    );
                    MessageEnvelope::error_to(
                        &request,
                        ErrorKind::HandlerError,
                        format!("handler panicked: {}", message),
                    )
                }
            };
            router.reply(&request, reply).await;
        });
    }

    fn handle_response(&self, response: MessageEnvelope) {
        let Some(id) = response.correlation_id.as_deref() else {
            debug!(id = %response.message_id, "Response without correlation id");
            return;
        };

        let waiter = self.pending.lock().remove(id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!(correlation_id = %id, "Discarding unmatched response"),
        }
    }

    fn handle_event(&self, event: MessageEnvelope) {
        let key = (event.service_name.clone(), event.method.clone());
        let callbacks = self
            .event_handlers
            .read()
            .get(&key)
            .cloned()
            .unwrap_or_default();

        for callback in callbacks {
            let payload = event.payload.clone();
            let workers = self.workers.clone();
            let service = event.service_name.clone();
            let name = event.method.clone();
            tokio::spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return;
                };
                match AssertUnwindSafe(callback.handle(payload)).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(service = %service, event = %name, error = %e, "Event handler failed")
                    }
                    Err(panic) => error!(
                        service = %service,
                        event = %name,
                        panic = %panic_message(panic.as_ref()),
                        "Event handler panicked"
                    ),
                }
            });
        }
    }

    fn handle_health_check(self: &Arc<Self>, check: MessageEnvelope) {
        let state = self.hosted.read().get(&check.service_name).cloned();
        let Some(state) = state else {
            return;
        };
        // Health replies also travel as HEALTH_CHECK envelopes; only answer checks
        if check.method == crate::envelope::HEALTH_RESPONSE_METHOD {
            return;
        }

        let payload = match serde_json::to_value(state.read().snapshot()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(service = %check.service_name, error = %e, "Failed to encode health");
                return;
            }
        };

        let (topic, reply) = match &check.response_topic {
            Some(topic) => (topic.clone(), MessageEnvelope::response_to(&check, payload)),
            None => (
                self.topics.health_response(&check.service_name),
                MessageEnvelope::health_reply(&check.service_name, payload),
            ),
        };

        let router = self.clone();
        tokio::spawn(async move { router.publish_envelope(&topic, &reply).await });
    }

    async fn reply(&self, request: &MessageEnvelope, reply: MessageEnvelope) {
        match &request.response_topic {
            Some(topic) => self.publish_envelope(topic, &reply).await,
            None => debug!(
                service = %request.service_name,
                method = %request.method,
                "Request has no response topic, dropping reply"
            ),
        }
    }

    async fn publish_envelope(&self, topic: &str, envelope: &MessageEnvelope) {
        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Failed to encode envelope");
                return;
            }
        };
        if let Err(e) = self.transport.publish(topic, bytes).await {
            warn!(topic = %topic, error = %e, "Failed to publish reply");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Connection to the service bus
///
/// Created with [`ServiceBus::connect`]; share it as `Arc<ServiceBus>`.
pub struct ServiceBus {
    config: BusConfig,
    router: Arc<Router>,
    runtime: Handle,
    listener: Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
}

impl ServiceBus {
    /// Subscribe to the bus topic families and start the delivery loop
    pub async fn connect(
        config: BusConfig,
        transport: Arc<dyn BrokerTransport>,
    ) -> BusResult<Arc<Self>> {
        let topics = TopicScheme::new(&config.base_topic);
        let router = Arc::new(Router {
            topics,
            transport,
            handlers: RwLock::new(HashMap::new()),
            event_handlers: RwLock::new(HashMap::new()),
            hosted: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            seen: Mutex::new(SeenIds::new()),
            workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
        });

        // Receiver first so nothing published after subscribing is missed
        let incoming = router.transport.incoming();
        for filter in router.topics.subscriptions() {
            router.transport.subscribe(&filter).await?;
        }
        let listener = router.start_listener(incoming);

        info!(
            client_id = %config.client_id,
            base_topic = %router.topics.base(),
            max_workers = config.max_workers,
            "Service bus connected"
        );

        Ok(Arc::new(Self {
            config,
            router,
            runtime: Handle::current(),
            listener: Mutex::new(Some(listener)),
            connected: AtomicBool::new(true),
        }))
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn topics(&self) -> &TopicScheme {
        &self.router.topics
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Register the handler for `service.method`, replacing any previous one
    pub fn register_handler(
        &self,
        service: impl Into<String>,
        method: impl Into<String>,
        handler: impl MethodHandler + 'static,
    ) {
        self.register_handler_arc(service.into(), method.into(), Arc::new(handler));
    }

    pub(crate) fn register_handler_arc(
        &self,
        service: String,
        method: String,
        handler: Arc<dyn MethodHandler>,
    ) {
        debug!(service = %service, method = %method, "Registered method handler");
        self.router.handlers.write().insert((service, method), handler);
    }

    /// Add a callback for `event` published by `service`
    pub fn register_event_handler(
        &self,
        service: impl Into<String>,
        event: impl Into<String>,
        handler: impl EventHandler + 'static,
    ) {
        self.register_event_handler_arc(service.into(), event.into(), Arc::new(handler));
    }

    pub(crate) fn register_event_handler_arc(
        &self,
        service: String,
        event: String,
        handler: Arc<dyn EventHandler>,
    ) {
        debug!(service = %service, event = %event, "Registered event handler");
        self.router
            .event_handlers
            .write()
            .entry((service, event))
            .or_default()
            .push(handler);
    }

    /// Call `service.method` and wait up to `timeout` for its result
    ///
    /// An unknown method on a hosted service fails with
    /// [`BusError::HandlerMissing`] after one round trip. A service that no
    /// connected bus hosts gets no reply at all, so the call ends in
    /// [`BusError::Timeout`].
    pub async fn call_service(
        &self,
        service: &str,
        method: &str,
        payload: Value,
        timeout: Duration,
    ) -> BusResult<Value> {
        let request = MessageEnvelope::request(service, method, payload);
        let topic = self.router.topics.service_request(service, method);
        debug!(service = %service, method = %method, id = %request.message_id, "Calling service");

        match self.round_trip(request, &topic, timeout).await? {
            Some(response) => response.into_result(service, method),
            None => Err(BusError::Timeout {
                service: service.to_string(),
                method: method.to_string(),
                timeout,
            }),
        }
    }

    /// Blocking form of [`call_service`](Self::call_service)
    ///
    /// Blocks only the calling thread.
    ///
    /// # Panics
    ///
    /// Panics if called from inside an async task; use `call_service` or
    /// `spawn_call` there.
    pub fn call_service_blocking(
        &self,
        service: &str,
        method: &str,
        payload: Value,
        timeout: Duration,
    ) -> BusResult<Value> {
        self.runtime
            .block_on(self.call_service(service, method, payload, timeout))
    }

    /// Start a call in the background and return its handle
    pub fn spawn_call(
        self: &Arc<Self>,
        service: impl Into<String>,
        method: impl Into<String>,
        payload: Value,
        timeout: Duration,
    ) -> JoinHandle<BusResult<Value>> {
        let bus = self.clone();
        let service = service.into();
        let method = method.into();
        self.runtime.spawn(async move {
            bus.call_service(&service, &method, payload, timeout)
                .await
        })
    }

    /// Ask the node hosting `service` for its health snapshot
    pub async fn check_service_health(
        &self,
        service: &str,
        timeout: Duration,
    ) -> BusResult<HealthInfo> {
        let check = MessageEnvelope::health_check(service);
        let topic = self.router.topics.health(service);

        match self.round_trip(check, &topic, timeout).await? {
            Some(response) => {
                let payload = response.into_result(service, "health_check")?;
                Ok(serde_json::from_value(payload)?)
            }
            None => Err(BusError::Timeout {
                service: service.to_string(),
                method: "health_check".to_string(),
                timeout,
            }),
        }
    }

    /// Fire-and-forget event from `service`
    pub async fn publish_event(&self, service: &str, event: &str, payload: Value) -> BusResult<()> {
        self.ensure_connected()?;
        let envelope = MessageEnvelope::event(service, event, payload);
        let topic = self.router.topics.event(service, event);
        self.router.transport.publish(&topic, envelope.to_bytes()?).await?;
        debug!(service = %service, event = %event, "Published event");
        Ok(())
    }

    /// Number of calls waiting for a response
    pub fn pending_calls(&self) -> usize {
        self.router.pending.lock().len()
    }

    /// Stop the delivery loop and close the broker connection
    ///
    /// Outstanding calls fail with `Disconnected`.
    pub async fn disconnect(&self) -> BusResult<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        self.router.pending.lock().clear();
        self.router.transport.disconnect().await?;
        info!(client_id = %self.config.client_id, "Service bus disconnected");
        Ok(())
    }

    pub(crate) fn host(&self, service: &str) -> Arc<RwLock<HealthState>> {
        let state = Arc::new(RwLock::new(HealthState::new(service)));
        self.router
            .hosted
            .write()
            .insert(service.to_string(), state.clone());
        state
    }

    /// Forget a hosted service and its method handlers
    pub(crate) fn unhost(&self, service: &str) {
        self.router.hosted.write().remove(service);
        self.router
            .handlers
            .write()
            .retain(|(owner, _), _| owner != service);
    }

    pub(crate) async fn subscribe(&self, filter: &str) -> BusResult<()> {
        self.ensure_connected()?;
        Ok(self.router.transport.subscribe(filter).await?)
    }

    pub(crate) async fn unsubscribe(&self, filter: &str) -> BusResult<()> {
        self.ensure_connected()?;
        Ok(self.router.transport.unsubscribe(filter).await?)
    }

    /// Publish a discovery announcement for `service`
    pub(crate) async fn announce(&self, service: &str, event: &str, payload: Value) -> BusResult<()> {
        self.ensure_connected()?;
        let envelope = MessageEnvelope::event(service, event, payload);
        let topic = self.router.topics.discovery();
        self.router.transport.publish(&topic, envelope.to_bytes()?).await?;
        Ok(())
    }

    /// Publish `request` with a private reply topic and await the correlated reply
    ///
    /// `Ok(None)` means the window elapsed.
    async fn round_trip(
        &self,
        request: MessageEnvelope,
        topic: &str,
        timeout: Duration,
    ) -> BusResult<Option<MessageEnvelope>> {
        self.ensure_connected()?;

        let reply_topic = self.router.topics.response(&request.message_id);
        let request = request.with_response_topic(reply_topic.clone());
        let bytes = request.to_bytes()?;

        let (_guard, rx) = PendingGuard::register(&self.router.pending, request.message_id.clone());
        let transport = &self.router.transport;
        transport.subscribe(&reply_topic).await?;

        let outcome = match transport.publish(topic, bytes).await {
            Ok(()) => Ok(tokio::time::timeout(timeout, rx).await),
            Err(e) => Err(e),
        };

        if let Err(e) = transport.unsubscribe(&reply_topic).await {
            debug!(topic = %reply_topic, error = %e, "Failed to drop reply subscription");
        }

        match outcome? {
            Ok(Ok(reply)) => Ok(Some(reply)),
            Ok(Err(_)) => Err(BusError::Disconnected),
            Err(_) => {
                warn!(service = %request.service_name, method = %request.method, ?timeout, "Call timed out");
                Ok(None)
            }
        }
    }

    fn ensure_connected(&self) -> BusResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BusError::Disconnected)
        }
    }
}

impl Drop for ServiceBus {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seen_ids_reject_duplicates() {
        let mut seen = SeenIds::new();
        assert!(seen.insert("a"));
        assert!(!seen.insert("a"));
        assert!(seen.insert("b"));
    }

    #[test]
    fn seen_ids_forget_oldest() {
        let mut seen = SeenIds::new();
        for i in 0..SEEN_CAPACITY {
            assert!(seen.insert(&i.to_string()));
        }
        assert!(seen.insert("overflow"));
        // "0" was evicted, "2" is still remembered
        assert!(seen.insert("0"));
        assert!(!seen.insert("2"));
    }

    #[test]
    fn pending_guard_cleans_up_on_drop() {
        let pending: PendingCalls = Mutex::new(HashMap::new());
        {
            let (_guard, _rx) = PendingGuard::register(&pending, "id".to_string());
            assert_eq!(pending.lock().len(), 1);
        }
        assert!(pending.lock().is_empty());
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
