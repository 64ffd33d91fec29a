//! Environment-driven settings
//!
//! The orchestrator injects `PORT`; everything else comes from the service
//! definition's environment overrides.

use anyhow::{Context, Result};

pub const DEFAULT_PORT: u16 = 8001;
pub const DEFAULT_SERVICE_NAME: &str = "vin-decoder";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub base_topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub port: u16,
    pub service_name: String,
    /// Bus connection; `None` when `MQTT_BROKER_HOST` is unset
    pub broker: Option<BrokerSettings>,
}

impl ServiceSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("Invalid PORT value '{}'", raw))?,
            None => DEFAULT_PORT,
        };

        let service_name = lookup("SERVICE_NAME").unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

        let broker = match lookup("MQTT_BROKER_HOST") {
            Some(host) => {
                let port = match lookup("MQTT_BROKER_PORT") {
                    Some(raw) => raw
                        .parse()
                        .with_context(|| format!("Invalid MQTT_BROKER_PORT value '{}'", raw))?,
                    None => 1883,
                };
                Some(BrokerSettings {
                    host,
                    port,
                    base_topic: lookup("MOTOSPECT_BASE_TOPIC")
                        .unwrap_or_else(|| "motospect".to_string()),
                })
            }
            None => None,
        };

        Ok(Self {
            port,
            service_name,
            broker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<ServiceSettings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.port, DEFAULT_PORT);
        assert_eq!(s.service_name, DEFAULT_SERVICE_NAME);
        assert!(s.broker.is_none());
    }

    #[test]
    fn broker_from_environment() {
        let s = settings(&[
            ("PORT", "8123"),
            ("SERVICE_NAME", "fault-detector"),
            ("MQTT_BROKER_HOST", "broker"),
            ("MQTT_BROKER_PORT", "2883"),
        ])
        .unwrap();
        assert_eq!(s.port, 8123);
        assert_eq!(s.service_name, "fault-detector");
        assert_eq!(
            s.broker,
            Some(BrokerSettings {
                host: "broker".to_string(),
                port: 2883,
                base_topic: "motospect".to_string(),
            })
        );
    }

    #[test]
    fn invalid_port_is_rejected() {
        assert!(settings(&[("PORT", "eighty")]).is_err());
    }
}
