//! motospect-cli - orchestrate MOTOSPECT services from the command line
//!
//! Registers, starts, stops and inspects the services defined in the
//! configuration file, and talks to running services over the bus.

mod commands;
mod config;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use motospect_bus::{BusError, MqttSettings, MqttTransport, ServiceBus};
use motospect_orchestrator::{OrchestratorError, ServiceManager};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "motospect-cli")]
#[command(author, version, about = "MOTOSPECT service orchestration CLI")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MOTOSPECT_CONFIG")]
    config: Option<PathBuf>,

    /// Broker host (overrides the config file)
    #[arg(long, env = "MOTOSPECT_BROKER_HOST")]
    broker_host: Option<String>,

    /// Broker port (overrides the config file)
    #[arg(long, env = "MOTOSPECT_BROKER_PORT")]
    broker_port: Option<u16>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register services from the config file
    Register {
        /// Services to register (all configured services when omitted)
        names: Vec<String>,
    },

    /// Start a service (waits until it is healthy)
    Start {
        /// Service name
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        name: Option<String>,

        /// Start every registered service in dependency order
        #[arg(long)]
        all: bool,
    },

    /// Stop a service
    Stop {
        /// Service name
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        name: Option<String>,

        /// Stop every registered service in reverse dependency order
        #[arg(long)]
        all: bool,
    },

    /// Restart a service
    Restart {
        /// Service name
        name: String,
    },

    /// Show service status
    Status {
        /// Service name (all services when omitted)
        name: Option<String>,
    },

    /// Check a service's health
    Health {
        /// Service name
        name: String,

        /// Ask the service over the bus instead of probing HTTP
        #[arg(long)]
        bus: bool,

        /// Bus timeout in seconds
        #[arg(long, default_value = "10")]
        timeout: u64,
    },

    /// Call a method on a service over the bus
    Call {
        /// Service name
        service: String,

        /// Method name
        method: String,

        /// Payload as JSON (defaults to {})
        payload: Option<String>,

        /// Timeout in seconds (defaults to the configured request timeout)
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let ctx = OutputContext::new(cli.output, cli.no_color, cli.quiet);

    match run(cli, &ctx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ctx.error(&format!("Error: {:#}", e));
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(cli: Cli, ctx: &OutputContext) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?.with_broker(cli.broker_host, cli.broker_port);

    match &cli.command {
        Commands::Register { names } => {
            let manager = create_manager(&config);
            commands::register(&manager, &config.services, names, ctx).await?;
        }

        Commands::Start { name, .. } => {
            let manager = create_manager(&config);
            commands::start(&manager, name.as_deref(), ctx).await?;
        }

        Commands::Stop { name, .. } => {
            let manager = create_manager(&config);
            commands::stop(&manager, name.as_deref(), ctx).await?;
        }

        Commands::Restart { name } => {
            let manager = create_manager(&config);
            commands::restart(&manager, name, ctx).await?;
        }

        Commands::Status { name } => {
            let manager = create_manager(&config);
            commands::status(&manager, name.as_deref(), ctx).await?;
        }

        Commands::Health { name, bus, timeout } => {
            if *bus {
                let bus = connect_bus(&config).await?;
                let result = commands::health::bus_health(
                    &bus,
                    name,
                    std::time::Duration::from_secs(*timeout),
                    ctx,
                )
                .await;
                disconnect(&bus).await;
                result?;
            } else {
                let manager = create_manager(&config);
                commands::health(&manager, name, ctx).await?;
            }
        }

        Commands::Call {
            service,
            method,
            payload,
            timeout,
        } => {
            let timeout = timeout
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.bus.request_timeout());
            let bus = connect_bus(&config).await?;
            let result =
                commands::call(&bus, service, method, payload.as_deref(), timeout, ctx).await;
            disconnect(&bus).await;
            result?;
        }
    }

    Ok(())
}

fn create_manager(config: &Config) -> ServiceManager {
    ServiceManager::new(config.manager_settings())
}

/// Connect to the configured MQTT broker
async fn connect_bus(config: &Config) -> Result<Arc<ServiceBus>> {
    let client_id = config.bus.client_id();
    let settings = MqttSettings::new(&config.bus.broker_host, config.bus.broker_port, &client_id);
    let transport = MqttTransport::connect(&settings).await.with_context(|| {
        format!(
            "Failed to connect to broker {}:{}",
            config.bus.broker_host, config.bus.broker_port
        )
    })?;

    let bus = ServiceBus::connect(config.bus.bus_config(client_id), Arc::new(transport)).await?;
    Ok(bus)
}

async fn disconnect(bus: &ServiceBus) {
    if let Err(e) = bus.disconnect().await {
        tracing::debug!(error = %e, "Bus disconnect failed");
    }
}

/// Map an error chain to the process exit code
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<OrchestratorError>() {
        return u8::try_from(e.exit_code()).unwrap_or(1);
    }
    match err.downcast_ref::<BusError>() {
        Some(BusError::Timeout { .. }) => 20,
        Some(BusError::HandlerMissing { .. }) => 21,
        Some(BusError::HandlerError { .. }) => 22,
        Some(_) => 23,
        None => 1,
    }
}
