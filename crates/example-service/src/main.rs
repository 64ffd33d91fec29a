//! example-service - service process launched by the orchestrator
//!
//! Environment:
//!   PORT                  HTTP port (injected by the orchestrator, default 8001)
//!   SERVICE_NAME          name on the bus and in health replies
//!   MQTT_BROKER_HOST      broker host; the bus node is skipped when unset
//!   MQTT_BROKER_PORT      broker port (default 1883)
//!   MOTOSPECT_BASE_TOPIC  topic prefix (default "motospect")

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use example_service::config::{BrokerSettings, ServiceSettings};
use example_service::http::{router, HttpState};
use example_service::methods::build_node;
use motospect_bus::{BusConfig, MqttSettings, MqttTransport, ServiceBus, ServiceNode};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "example_service=info,motospect_bus=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = ServiceSettings::from_env()?;
    tracing::info!(service = %settings.service_name, port = settings.port, "Starting example-service");

    let node = match &settings.broker {
        Some(broker) => Some(connect_node(&settings.service_name, broker).await?),
        None => {
            tracing::info!("MQTT_BROKER_HOST not set, running without the service bus");
            None
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, router(HttpState::new(&settings.service_name)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(node) = node {
        let bus = node.bus().clone();
        node.shutdown().await?;
        bus.disconnect().await?;
    }
    tracing::info!("example-service stopped");
    Ok(())
}

async fn connect_node(service_name: &str, broker: &BrokerSettings) -> anyhow::Result<ServiceNode> {
    let client_id = format!("{}-{}", service_name, std::process::id());
    let transport = MqttTransport::connect(&MqttSettings::new(&broker.host, broker.port, &client_id))
        .await
        .with_context(|| format!("Failed to connect to broker {}:{}", broker.host, broker.port))?;

    let config = BusConfig {
        base_topic: broker.base_topic.clone(),
        client_id,
        ..Default::default()
    };
    let bus = ServiceBus::connect(config, Arc::new(transport)).await?;
    Ok(build_node(service_name, bus).await?)
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
