//! Wire envelope carried by every bus message
//!
//! ```json
//! {
//!   "message_id": "5b0c...",
//!   "message_type": "request",
//!   "service_name": "vin-decoder-service",
//!   "method": "decode",
//!   "payload": {"vin": "..."},
//!   "response_topic": "motospect/responses/5b0c...",
//!   "timestamp": 1718000000.123
//! }
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{BusError, BusResult};

/// Method name carried by error responses
pub const ERROR_METHOD: &str = "error";

/// Method name of health replies published without a response topic
pub const HEALTH_RESPONSE_METHOD: &str = "health_response";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Event,
    HealthCheck,
}

/// Reason carried in an error response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    HandlerMissing,
    HandlerError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub message_id: String,
    #[serde(rename = "message_type")]
    pub kind: MessageKind,
    pub service_name: String,
    pub method: String,
    #[serde(default = "empty_payload")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_topic: Option<String>,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    /// For responses: the id of the request being answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

fn empty_payload() -> Value {
    json!({})
}

fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

impl MessageEnvelope {
    fn new(
        kind: MessageKind,
        service_name: impl Into<String>,
        method: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            kind,
            service_name: service_name.into(),
            method: method.into(),
            payload,
            response_topic: None,
            timestamp: now_secs(),
            correlation_id: None,
        }
    }

    pub fn request(
        service_name: impl Into<String>,
        method: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::new(MessageKind::Request, service_name, method, payload)
    }

    pub fn event(service_name: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self::new(MessageKind::Event, service_name, event, payload)
    }

    pub fn health_check(service_name: impl Into<String>) -> Self {
        Self::new(MessageKind::HealthCheck, service_name, "health_check", empty_payload())
    }

    /// Health snapshot published to `{base}/health/{service}/response`
    pub fn health_reply(service_name: impl Into<String>, payload: Value) -> Self {
        Self::new(
            MessageKind::HealthCheck,
            service_name,
            HEALTH_RESPONSE_METHOD,
            payload,
        )
    }

    /// Successful response correlated with `request`
    pub fn response_to(request: &MessageEnvelope, payload: Value) -> Self {
        let mut response = Self::new(
            MessageKind::Response,
            request.service_name.clone(),
            request.method.clone(),
            payload,
        );
        response.correlation_id = Some(request.message_id.clone());
        response
    }

    /// Error response correlated with `request`
    pub fn error_to(request: &MessageEnvelope, kind: ErrorKind, message: impl Into<String>) -> Self {
        let mut response = Self::new(
            MessageKind::Response,
            request.service_name.clone(),
            ERROR_METHOD,
            json!({ "error": message.into(), "kind": kind }),
        );
        response.correlation_id = Some(request.message_id.clone());
        response
    }

    pub fn with_response_topic(mut self, topic: impl Into<String>) -> Self {
        self.response_topic = Some(topic.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Response && self.method == ERROR_METHOD
    }

    /// Turn a response into the caller-facing result of `service.method`
    pub fn into_result(self, service: &str, method: &str) -> BusResult<Value> {
        if !self.is_error() {
            return Ok(self.payload);
        }

        let message = self
            .payload
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        let kind = self
            .payload
            .get("kind")
            .cloned()
            .and_then(|k| serde_json::from_value::<ErrorKind>(k).ok())
            .unwrap_or(ErrorKind::HandlerError);

        Err(match kind {
            ErrorKind::HandlerMissing => BusError::HandlerMissing {
                service: service.to_string(),
                method: method.to_string(),
            },
            ErrorKind::HandlerError => BusError::HandlerError {
                service: service.to_string(),
                method: method.to_string(),
                message,
            },
        })
    }

    pub fn to_bytes(&self) -> BusResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_slice(bytes: &[u8]) -> BusResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_wire_shape() {
        let request = MessageEnvelope::request("vin-decoder", "decode", json!({"vin": "X"}))
            .with_response_topic("motospect/responses/abc");
        let wire: Value = serde_json::from_slice(&request.to_bytes().unwrap()).unwrap();

        assert_eq!(wire["message_type"], "request");
        assert_eq!(wire["service_name"], "vin-decoder");
        assert_eq!(wire["method"], "decode");
        assert_eq!(wire["payload"], json!({"vin": "X"}));
        assert_eq!(wire["response_topic"], "motospect/responses/abc");
        assert!(wire["timestamp"].as_f64().unwrap() > 1_600_000_000.0);
        assert!(wire.get("correlation_id").is_none());
        assert!(Uuid::parse_str(wire["message_id"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn response_is_correlated() {
        let request = MessageEnvelope::request("svc", "echo", json!(1));
        let response = MessageEnvelope::response_to(&request, json!(2));

        assert_eq!(response.kind, MessageKind::Response);
        assert_eq!(response.correlation_id.as_deref(), Some(request.message_id.as_str()));
        assert_ne!(response.message_id, request.message_id);
        assert_eq!(response.into_result("svc", "echo").unwrap(), json!(2));
    }

    #[test]
    fn error_response_maps_to_bus_error() {
        let request = MessageEnvelope::request("svc", "nope", json!({}));

        let missing = MessageEnvelope::error_to(&request, ErrorKind::HandlerMissing, "no handler");
        assert_eq!(missing.method, "error");
        assert_eq!(missing.payload["kind"], "handler_missing");
        assert!(matches!(
            missing.into_result("svc", "nope"),
            Err(BusError::HandlerMissing { .. })
        ));

        let failed = MessageEnvelope::error_to(&request, ErrorKind::HandlerError, "boom");
        match failed.into_result("svc", "nope") {
            Err(BusError::HandlerError { message, .. }) => assert_eq!(message, "boom"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn accepts_null_optionals_and_missing_payload() {
        let raw = r#"{
            "message_id": "m1",
            "message_type": "health_check",
            "service_name": "svc",
            "method": "health_check",
            "response_topic": null,
            "timestamp": 1.5
        }"#;
        let envelope = MessageEnvelope::from_slice(raw.as_bytes()).unwrap();
        assert_eq!(envelope.kind, MessageKind::HealthCheck);
        assert_eq!(envelope.payload, json!({}));
        assert!(envelope.response_topic.is_none());
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let raw = r#"{"message_id":"m","message_type":"gossip","service_name":"s","method":"m","timestamp":0}"#;
        assert!(matches!(
            MessageEnvelope::from_slice(raw.as_bytes()),
            Err(BusError::Codec(_))
        ));
    }
}
