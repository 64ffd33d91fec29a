//! Error types for service orchestration

use std::time::Duration;

use thiserror::Error;

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors that can occur while managing services
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Unknown service name
    #[error("Service not found: {0}")]
    NotFound(String),

    /// No free port left in the configured range
    #[error("No available ports for service {service} in range {start}..{end}")]
    ResourceExhausted {
        service: String,
        start: u16,
        end: u16,
    },

    /// A fixed port is already held by another service
    #[error("Port {port} requested by {service} is held by {holder}")]
    PortInUse {
        service: String,
        port: u16,
        holder: String,
    },

    /// A prerequisite service is not healthy
    #[error("Dependency {dependency} not available for {service}")]
    DependencyUnavailable { service: String, dependency: String },

    /// A declared dependency was never registered
    #[error("Service {service} depends on unregistered service {dependency}")]
    UnknownDependency { service: String, dependency: String },

    /// The dependency graph contains a cycle
    #[error("Dependency cycle between services: {0:?}")]
    DependencyCycle(Vec<String>),

    /// The process could not be launched
    #[error("Failed to spawn {service}: {source}")]
    SpawnFailed {
        service: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exited before it became healthy
    #[error("Service {service} exited during startup ({status})")]
    ExitedDuringStartup { service: String, status: String },

    /// The health check never succeeded within the startup window
    #[error("Service {service} did not become healthy within {timeout:?}")]
    StartupTimeout { service: String, timeout: Duration },

    /// Configuration cannot be replaced while the service runs
    #[error("Service {0} is running; stop it before re-registering")]
    AlreadyRunning(String),

    /// Invalid service definition
    #[error("Invalid service config: {0}")]
    InvalidConfig(String),

    /// Registry snapshot could not be read or written
    #[error("Registry error: {0}")]
    Registry(String),

    /// Termination signal could not be delivered
    #[error("Failed to stop {service}: {message}")]
    Stop { service: String, message: String },
}

impl OrchestratorError {
    /// Process exit code used by the CLI for this error kind
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestratorError::NotFound(_) => 2,
            OrchestratorError::ResourceExhausted { .. } => 3,
            OrchestratorError::PortInUse { .. } => 3,
            OrchestratorError::DependencyUnavailable { .. } => 4,
            OrchestratorError::UnknownDependency { .. } => 4,
            OrchestratorError::DependencyCycle(_) => 4,
            OrchestratorError::SpawnFailed { .. } => 5,
            OrchestratorError::ExitedDuringStartup { .. } => 6,
            OrchestratorError::StartupTimeout { .. } => 7,
            OrchestratorError::AlreadyRunning(_) => 8,
            OrchestratorError::InvalidConfig(_) => 9,
            OrchestratorError::Registry(_) => 10,
            OrchestratorError::Stop { .. } => 11,
        }
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        OrchestratorError::Registry(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Registry(err.to_string())
    }
}
