//! motospect-orchestrator - lifecycle management for local service processes
//!
//! Starts services as child processes, hands each a port, gates "running" on
//! an HTTP health probe and keeps a durable registry of what it launched.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ServiceManager                          │
//! │  start / stop / restart / status / start_all / stop_all    │
//! │                                                             │
//! │  ┌─────────────┐  ┌─────────────────┐  ┌─────────────────┐ │
//! │  │ PortManager │  │ ServiceRegistry │  │  HealthProbe    │ │
//! │  │ (range scan)│  │ (JSON snapshot) │  │ (HTTP GET)      │ │
//! │  └─────────────┘  └─────────────────┘  └─────────────────┘ │
//! │                          │                                  │
//! │                    ┌─────┴─────┐                            │
//! │                    │  process  │                            │
//! │                    │ spawn/TERM│                            │
//! │                    └───────────┘                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod health;
pub mod manager;
pub mod model;
pub mod order;
pub mod port;
mod process;
pub mod registry;

pub use config::{ManagerSettings, PortSettings};
pub use error::{OrchestratorError, OrchestratorResult};
pub use health::{HealthChecker, HealthProbe};
pub use manager::{BulkOutcome, ServiceManager};
pub use model::{ServiceConfig, ServiceRecord, ServiceRuntimeInfo, ServiceStatus, ServiceStatusReport};
pub use order::startup_order;
pub use port::PortManager;
pub use registry::ServiceRegistry;
