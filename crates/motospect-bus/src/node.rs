//! Per-service facade over the bus

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::bus::ServiceBus;
use crate::error::BusResult;
use crate::handler::{EventHandler, MethodHandler};
use crate::health::{HealthInfo, HealthState};

/// Discovery event sent when a node comes up
pub const SERVICE_REGISTERED: &str = "service_registered";
/// Discovery event sent when a node shuts down
pub const SERVICE_UNREGISTERED: &str = "service_unregistered";

pub struct ServiceNodeBuilder {
    name: String,
    methods: Vec<(String, Arc<dyn MethodHandler>)>,
    events: Vec<(String, String, Arc<dyn EventHandler>)>,
    health_check_interval: Duration,
}

impl ServiceNodeBuilder {
    pub fn method(mut self, name: impl Into<String>, handler: impl MethodHandler + 'static) -> Self {
        self.methods.push((name.into(), Arc::new(handler)));
        self
    }

    /// Subscribe to `event` published by `service`
    pub fn event(
        mut self,
        service: impl Into<String>,
        event: impl Into<String>,
        handler: impl EventHandler + 'static,
    ) -> Self {
        self.events
            .push((service.into(), event.into(), Arc::new(handler)));
        self
    }

    /// Interval advertised in the discovery announcement
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Host the service on `bus` and announce it
    pub async fn build(self, bus: Arc<ServiceBus>) -> BusResult<ServiceNode> {
        let health = bus.host(&self.name);

        let mut endpoints = Vec::with_capacity(self.methods.len());
        for (method, handler) in self.methods {
            bus.register_handler_arc(self.name.clone(), method.clone(), handler);
            endpoints.push(method);
        }
        for (service, event, handler) in self.events {
            bus.register_event_handler_arc(service, event, handler);
        }

        bus.subscribe(&bus.topics().service_requests(&self.name))
            .await?;

        let node = ServiceNode {
            name: self.name,
            bus,
            health,
            endpoints: RwLock::new(endpoints),
            health_check_interval: self.health_check_interval,
        };
        node.announce(SERVICE_REGISTERED).await?;
        info!(service = %node.name, endpoints = ?node.endpoints(), "Service node ready");
        Ok(node)
    }
}

/// A service hosted on the bus
pub struct ServiceNode {
    name: String,
    bus: Arc<ServiceBus>,
    health: Arc<RwLock<HealthState>>,
    endpoints: RwLock<Vec<String>>,
    health_check_interval: Duration,
}

impl ServiceNode {
    pub fn builder(name: impl Into<String>) -> ServiceNodeBuilder {
        ServiceNodeBuilder {
            name: name.into(),
            methods: Vec::new(),
            events: Vec::new(),
            health_check_interval: Duration::from_secs(30),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Arc<ServiceBus> {
        &self.bus
    }

    /// Add a method after the node was built
    pub fn register_method(&self, method: impl Into<String>, handler: impl MethodHandler + 'static) {
        let method = method.into();
        self.bus
            .register_handler_arc(self.name.clone(), method.clone(), Arc::new(handler));
        let mut endpoints = self.endpoints.write();
        if !endpoints.contains(&method) {
            endpoints.push(method);
        }
    }

    pub fn register_event_handler(
        &self,
        service: impl Into<String>,
        event: impl Into<String>,
        handler: impl EventHandler + 'static,
    ) {
        self.bus.register_event_handler(service, event, handler);
    }

    /// Call another service with the bus default timeout
    pub async fn call_service(&self, service: &str, method: &str, payload: Value) -> BusResult<Value> {
        let timeout = self.bus.config().default_timeout;
        self.bus.call_service(service, method, payload, timeout).await
    }

    /// Publish an event sourced from this node
    pub async fn publish_event(&self, event: &str, payload: Value) -> BusResult<()> {
        self.bus.publish_event(&self.name, event, payload).await
    }

    pub fn get_health_info(&self) -> HealthInfo {
        self.health.read().snapshot()
    }

    /// Set the status string and merge `details` into the snapshot
    pub fn update_health_status(&self, status: impl Into<String>, details: Map<String, Value>) {
        self.health.write().update(status, details);
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.read().clone()
    }

    /// Announce departure, drop handlers and stop receiving requests
    pub async fn shutdown(self) -> BusResult<()> {
        if let Err(e) = self.announce(SERVICE_UNREGISTERED).await {
            warn!(service = %self.name, error = %e, "Failed to announce shutdown");
        }
        self.bus.unhost(&self.name);
        self.bus
            .unsubscribe(&self.bus.topics().service_requests(&self.name))
            .await?;
        info!(service = %self.name, "Service node shut down");
        Ok(())
    }

    async fn announce(&self, event: &str) -> BusResult<()> {
        let payload = json!({
            "service_name": self.name,
            "endpoints": self.endpoints(),
            "health_check_interval": self.health_check_interval.as_secs(),
        });
        self.bus.announce(&self.name, event, payload).await
    }
}
