//! Orchestrator settings
//!
//! Loaded from the `[orchestrator]` and `[ports]` sections of the TOML
//! configuration. Every field has a default so an empty file is valid.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the port allocator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSettings {
    /// First port of the allocation range (inclusive)
    #[serde(default = "default_range_start")]
    pub range_start: u16,
    /// End of the allocation range (exclusive)
    #[serde(default = "default_range_end")]
    pub range_end: u16,
    /// Ports never handed out
    #[serde(default)]
    pub reserved: BTreeSet<u16>,
    /// Host used for bind probes
    #[serde(default = "default_probe_host")]
    pub probe_host: String,
}

fn default_range_start() -> u16 {
    8000
}

fn default_range_end() -> u16 {
    9000
}

fn default_probe_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            range_start: default_range_start(),
            range_end: default_range_end(),
            reserved: BTreeSet::new(),
            probe_host: default_probe_host(),
        }
    }
}

/// Settings for the service manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Registry snapshot file
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
    /// Directory receiving per-service stdout/stderr logs
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Host used when building health URLs
    #[serde(default = "default_health_host")]
    pub health_host: String,
    /// How long a service may take to report healthy
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    /// Delay between health polls during startup
    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,
    /// Timeout of a single health probe
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Grace period between SIGTERM and SIGKILL
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Pause between stop and start on restart
    #[serde(default = "default_restart_settle_ms")]
    pub restart_settle_ms: u64,
    /// Port allocation settings
    #[serde(default)]
    pub ports: PortSettings,
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("service_registry.json")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_health_host() -> String {
    "127.0.0.1".to_string()
}

fn default_startup_timeout_ms() -> u64 {
    30_000
}

fn default_health_interval_ms() -> u64 {
    1_000
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_stop_grace_ms() -> u64 {
    10_000
}

fn default_restart_settle_ms() -> u64 {
    1_000
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            registry_path: default_registry_path(),
            log_dir: default_log_dir(),
            health_host: default_health_host(),
            startup_timeout_ms: default_startup_timeout_ms(),
            health_interval_ms: default_health_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            restart_settle_ms: default_restart_settle_ms(),
            ports: PortSettings::default(),
        }
    }
}

impl ManagerSettings {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    /// Health URL for a service listening on `port`
    pub fn health_url(&self, port: u16, path: &str) -> String {
        format!("http://{}:{}{}", self.health_host, port, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let settings: ManagerSettings = toml::from_str("").unwrap();
        assert_eq!(settings.startup_timeout(), Duration::from_secs(30));
        assert_eq!(settings.health_interval(), Duration::from_secs(1));
        assert_eq!(settings.ports.range_start, 8000);
        assert_eq!(settings.ports.range_end, 9000);
        assert!(settings.ports.reserved.is_empty());
    }

    #[test]
    fn reserved_ports_parse() {
        let settings: ManagerSettings = toml::from_str(
            r#"
            startup_timeout_ms = 500
            [ports]
            range_start = 41000
            range_end = 41010
            reserved = [41001, 41003]
            "#,
        )
        .unwrap();
        assert_eq!(settings.startup_timeout(), Duration::from_millis(500));
        assert!(settings.ports.reserved.contains(&41003));
    }

    #[test]
    fn health_url_uses_host_and_path() {
        let settings = ManagerSettings::default();
        assert_eq!(
            settings.health_url(8001, "/health"),
            "http://127.0.0.1:8001/health"
        );
    }
}
