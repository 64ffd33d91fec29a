//! Call command - invoke a method over the bus

use std::time::Duration;

use anyhow::{Context, Result};
use motospect_bus::ServiceBus;
use serde_json::Value;

use crate::output::OutputContext;

pub async fn call(
    bus: &ServiceBus,
    service: &str,
    method: &str,
    payload: Option<&str>,
    timeout: Duration,
    ctx: &OutputContext,
) -> Result<()> {
    let payload: Value = match payload {
        Some(raw) => serde_json::from_str(raw).context("Payload must be valid JSON")?,
        None => Value::Object(Default::default()),
    };

    let result = bus.call_service(service, method, payload, timeout).await?;
    ctx.print_json(&result);
    Ok(())
}
