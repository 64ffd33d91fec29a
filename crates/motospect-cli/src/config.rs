//! Configuration file handling for motospect-cli
//!
//! ```toml
//! [orchestrator]
//! registry_path = "service_registry.json"
//!
//! [ports]
//! range_start = 8000
//! range_end = 9000
//!
//! [bus]
//! broker_host = "localhost"
//!
//! [[services]]
//! name = "vin-decoder-service"
//! command = "python3"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use motospect_bus::BusConfig;
use motospect_orchestrator::{ManagerSettings, PortSettings, ServiceConfig};
use serde::{Deserialize, Serialize};

/// Project-local config file looked up when `--config` is not given
const LOCAL_CONFIG: &str = "config/motospect.toml";

/// Full configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub orchestrator: ManagerSettings,
    pub ports: PortSettings,
    pub bus: BusSettings,
    pub services: Vec<ServiceConfig>,
}

/// Broker connection and call defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub broker_host: String,
    pub broker_port: u16,
    pub base_topic: String,
    /// Generated per invocation when absent
    pub client_id: Option<String>,
    pub request_timeout_ms: u64,
    pub max_workers: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            base_topic: "motospect".to_string(),
            client_id: None,
            request_timeout_ms: 30_000,
            max_workers: 10,
        }
    }
}

impl BusSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn client_id(&self) -> String {
        self.client_id.clone().unwrap_or_else(|| {
            format!("motospect-cli-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
        })
    }

    pub fn bus_config(&self, client_id: String) -> BusConfig {
        BusConfig {
            base_topic: self.base_topic.clone(),
            client_id,
            max_workers: self.max_workers,
            default_timeout: self.request_timeout(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the first default location that exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from(path);
        }

        let local = PathBuf::from(LOCAL_CONFIG);
        if local.exists() {
            return Self::load_from(&local);
        }

        match Self::user_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `~/.config/motospect/config.toml` (platform equivalent)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("motospect").join("config.toml"))
    }

    /// Manager settings with the `[ports]` section folded in
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            ports: self.ports.clone(),
            ..self.orchestrator.clone()
        }
    }

    /// Apply broker overrides from flags / environment
    pub fn with_broker(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.bus.broker_host = host;
        }
        if let Some(port) = port {
            self.bus.broker_port = port;
        }
        self
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.bus.broker_port, 1883);
        assert_eq!(config.ports.range_start, 8000);
        assert!(config.services.is_empty());
    }

    #[test]
    fn full_file_parses() {
        let config = Config::parse(
            r#"
            [orchestrator]
            registry_path = "state/registry.json"
            startup_timeout_ms = 5000

            [ports]
            range_start = 9100
            range_end = 9200
            reserved = [9101]

            [bus]
            broker_host = "broker.local"
            base_topic = "garage"

            [[services]]
            name = "vin-decoder-service"
            command = "python3"
            args = ["main.py"]
            port = 8001

            [[services]]
            name = "diagnostic-service"
            command = "python3"
            dependencies = ["vin-decoder-service"]
            "#,
        )
        .unwrap();

        let settings = config.manager_settings();
        assert_eq!(settings.registry_path, PathBuf::from("state/registry.json"));
        assert_eq!(settings.startup_timeout_ms, 5000);
        assert_eq!(settings.ports.range_start, 9100);
        assert!(settings.ports.reserved.contains(&9101));

        assert_eq!(config.bus.broker_host, "broker.local");
        assert_eq!(config.bus.bus_config("cli".into()).base_topic, "garage");

        assert_eq!(config.services.len(), 2);
        let diag = config.service("diagnostic-service").unwrap();
        assert_eq!(diag.dependencies, vec!["vin-decoder-service"]);
        assert_eq!(diag.health_path, "/health");
    }

    #[test]
    fn broker_overrides_apply() {
        let config = Config::default().with_broker(Some("mqtt.example".into()), Some(2883));
        assert_eq!(config.bus.broker_host, "mqtt.example");
        assert_eq!(config.bus.broker_port, 2883);
    }

    #[test]
    fn sample_config_orders_all_services() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/motospect.toml");
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.services.len(), 5);
        assert!(config.ports.reserved.contains(&1883));

        let order = motospect_orchestrator::startup_order(&config.services).unwrap();
        let pos = |n: &str| order.iter().position(|o| o == n).unwrap();
        assert!(pos("vin-decoder-service") < pos("diagnostic-service"));
        assert!(pos("fault-detector-service") < pos("diagnostic-service"));
        assert!(pos("diagnostic-service") < pos("api-gateway"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
