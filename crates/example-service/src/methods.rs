//! Bus methods offered by the example service

use std::sync::Arc;

use motospect_bus::{BusResult, ServiceBus, ServiceNode};
use serde_json::{json, Value};

/// Host `service_name` on `bus` with its methods
pub async fn build_node(service_name: &str, bus: Arc<ServiceBus>) -> BusResult<ServiceNode> {
    let name = service_name.to_string();
    ServiceNode::builder(service_name)
        .method("echo", |payload: Value| async move { anyhow::Ok(payload) })
        .method("health", move |_payload: Value| {
            let name = name.clone();
            async move { anyhow::Ok(json!({"status": "healthy", "service": name})) }
        })
        .build(bus)
        .await
}
