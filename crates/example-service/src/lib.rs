//! example-service - a minimal service managed by the orchestrator
//!
//! Serves `GET /health` on `PORT` and, when a broker is configured, hosts a
//! bus node offering `echo` and `health`.

pub mod config;
pub mod http;
pub mod methods;
