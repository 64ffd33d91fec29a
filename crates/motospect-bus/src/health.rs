//! Health snapshots served by hosted services

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Health snapshot returned over the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthInfo {
    pub service: String,
    /// Free-form, "healthy" unless the service says otherwise
    pub status: String,
    /// Seconds since the node was built
    pub uptime: f64,
    pub start_time: DateTime<Utc>,
    /// Extra fields set through `update_health_status`
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug)]
pub(crate) struct HealthState {
    service: String,
    status: String,
    start_time: DateTime<Utc>,
    started: Instant,
    details: Map<String, Value>,
}

impl HealthState {
    pub(crate) fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            status: "healthy".to_string(),
            start_time: Utc::now(),
            started: Instant::now(),
            details: Map::new(),
        }
    }

    pub(crate) fn update(&mut self, status: impl Into<String>, details: Map<String, Value>) {
        self.status = status.into();
        self.details.extend(details);
    }

    pub(crate) fn snapshot(&self) -> HealthInfo {
        HealthInfo {
            service: self.service.clone(),
            status: self.status.clone(),
            uptime: self.started.elapsed().as_secs_f64(),
            start_time: self.start_time,
            details: self.details.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn details_are_merged_and_flattened() {
        let mut state = HealthState::new("vin");
        state.update("degraded", json!({"db": "down"}).as_object().cloned().unwrap());
        state.update("degraded", json!({"queue": 3}).as_object().cloned().unwrap());

        let wire = serde_json::to_value(state.snapshot()).unwrap();
        assert_eq!(wire["service"], "vin");
        assert_eq!(wire["status"], "degraded");
        assert_eq!(wire["db"], "down");
        assert_eq!(wire["queue"], 3);
        assert!(wire["uptime"].as_f64().unwrap() >= 0.0);
    }
}
