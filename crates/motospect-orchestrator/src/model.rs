//! Service definitions and runtime state

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, OrchestratorResult};

/// Static, author-supplied definition of a managed service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Unique service name
    pub name: String,
    /// Program to launch
    pub command: String,
    /// Arguments passed to the program
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the process
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Fixed port; auto-allocated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// HTTP path probed for readiness
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Extra environment variables
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Services that must be healthy before this one starts
    #[serde(default)]
    pub dependencies: Vec<String>,
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_health_path() -> String {
    "/health".to_string()
}

impl ServiceConfig {
    /// Create a config with defaults for everything but name and command
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            working_dir: default_working_dir(),
            port: None,
            health_path: default_health_path(),
            environment: BTreeMap::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Reject definitions that can never start
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.name.trim().is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "service name must not be empty".to_string(),
            ));
        }
        if self.command.trim().is_empty() {
            return Err(OrchestratorError::InvalidConfig(format!(
                "service {} has an empty command",
                self.name
            )));
        }
        if !self.health_path.starts_with('/') {
            return Err(OrchestratorError::InvalidConfig(format!(
                "health path for {} must start with '/': {}",
                self.name, self.health_path
            )));
        }
        if self.dependencies.iter().any(|d| d == &self.name) {
            return Err(OrchestratorError::InvalidConfig(format!(
                "service {} depends on itself",
                self.name
            )));
        }
        Ok(())
    }
}

/// Lifecycle state of a managed service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Error,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable runtime state, owned by the service manager
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRuntimeInfo {
    #[serde(default)]
    pub status: ServiceStatus,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub health_url: Option<String>,
}

impl ServiceRuntimeInfo {
    /// Reset to the stopped state
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One registry entry: static config plus last observed runtime state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub config: ServiceConfig,
    #[serde(flatten)]
    pub runtime: ServiceRuntimeInfo,
}

impl ServiceRecord {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            runtime: ServiceRuntimeInfo::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// Read-only status snapshot returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatusReport {
    pub name: String,
    pub status: ServiceStatus,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub health_url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub dependencies: Vec<String>,
    /// Live probe result; only probed while RUNNING
    pub healthy: bool,
}

impl ServiceStatusReport {
    pub(crate) fn from_record(record: &ServiceRecord, healthy: bool) -> Self {
        Self {
            name: record.config.name.clone(),
            status: record.runtime.status,
            port: record.runtime.port.or(record.config.port),
            pid: record.runtime.pid,
            health_url: record.runtime.health_url.clone(),
            started_at: record.runtime.started_at,
            dependencies: record.config.dependencies.clone(),
            healthy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_from_toml() {
        let config: ServiceConfig = toml::from_str(
            r#"
            name = "vin-decoder-service"
            command = "python3"
            args = ["main.py"]
            "#,
        )
        .unwrap();

        assert_eq!(config.health_path, "/health");
        assert_eq!(config.working_dir, PathBuf::from("."));
        assert!(config.port.is_none());
        assert!(config.dependencies.is_empty());
    }

    #[test]
    fn validate_rejects_self_dependency() {
        let config = ServiceConfig::new("a", "true").with_dependency("a");
        assert!(matches!(
            config.validate(),
            Err(OrchestratorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validate_rejects_relative_health_path() {
        let mut config = ServiceConfig::new("a", "true");
        config.health_path = "health".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn record_serializes_runtime_inline() {
        let mut record = ServiceRecord::new(ServiceConfig::new("a", "true"));
        record.runtime.status = ServiceStatus::Running;
        record.runtime.port = Some(8001);
        record.runtime.pid = Some(42);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["port"], 8001);
        assert_eq!(json["pid"], 42);
        assert_eq!(json["config"]["name"], "a");
    }
}
