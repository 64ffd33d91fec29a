//! Method and event handler traits
//!
//! Plain async closures implement both traits:
//!
//! ```ignore
//! bus.register_handler("vin-decoder", "echo", |payload: Value| async move {
//!     anyhow::Ok(payload)
//! });
//! ```

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

/// Handles requests for one `(service, method)`
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn call(&self, payload: Value) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> MethodHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn call(&self, payload: Value) -> anyhow::Result<Value> {
        (self)(payload).await
    }
}

/// Receives events published for one `(service, event)`
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, payload: Value) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, payload: Value) -> anyhow::Result<()> {
        (self)(payload).await
    }
}
