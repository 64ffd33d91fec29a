//! Health command - probe over HTTP or ask the node over the bus

use std::time::Duration;

use anyhow::Result;
use motospect_bus::ServiceBus;
use motospect_orchestrator::ServiceManager;

use crate::output::OutputContext;

/// HTTP probe of the recorded health URL
pub async fn health(manager: &ServiceManager, name: &str, ctx: &OutputContext) -> Result<()> {
    let report = manager.status_of(name).await?;
    let healthy = manager.is_healthy(name).await;

    ctx.print_kv(&[
        ("service", report.name),
        ("status", report.status.to_string()),
        ("healthy", healthy.to_string()),
        ("url", report.health_url.unwrap_or_else(|| "-".to_string())),
    ]);
    Ok(())
}

/// Health snapshot reported by the node itself
pub async fn bus_health(
    bus: &ServiceBus,
    name: &str,
    timeout: Duration,
    ctx: &OutputContext,
) -> Result<()> {
    let info = bus.check_service_health(name, timeout).await?;

    let mut pairs = vec![
        ("service", info.service),
        ("status", info.status),
        ("uptime", format!("{:.1}s", info.uptime)),
        ("start_time", info.start_time.to_rfc3339()),
    ];
    for (key, value) in &info.details {
        pairs.push((key.as_str(), value.to_string()));
    }
    ctx.print_kv(&pairs);
    Ok(())
}
