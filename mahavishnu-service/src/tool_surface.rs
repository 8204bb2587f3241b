//! Tool Surface. Registers named endpoints backed by the core managers;
//! the actual RPC/HTTP transport is modeled as the opaque `ToolTransport`
//! registration point.

use mahavishnu_common::SafeDisplay;
use mahavishnu_core::error::{
    BusError, BusyError, CircuitOpen, NoPoolAvailable, Overloaded, PoolExecuteError, RateLimited,
    RouteError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Aggregated error surfaced at the tool boundary: every domain error
/// enum composes into this one via `#[from]`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MahavishnuError {
    #[error(transparent)]
    Overloaded(#[from] Overloaded),
    #[error(transparent)]
    NoPoolAvailable(#[from] NoPoolAvailable),
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpen),
    #[error(transparent)]
    RateLimited(#[from] RateLimited),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Busy(#[from] BusyError),
    #[error("{0}")]
    BadRequest(String),
    #[error("internal error")]
    Internal,
}

impl From<PoolExecuteError> for MahavishnuError {
    fn from(value: PoolExecuteError) -> Self {
        match value {
            PoolExecuteError::Overloaded(e) => MahavishnuError::Overloaded(e),
            PoolExecuteError::Spawn(e) => MahavishnuError::BadRequest(e.to_string()),
            PoolExecuteError::Closed => MahavishnuError::BadRequest("pool is closed".to_string()),
        }
    }
}

impl From<RouteError> for MahavishnuError {
    fn from(value: RouteError) -> Self {
        match value {
            RouteError::NoPoolAvailable(e) => MahavishnuError::NoPoolAvailable(e),
        }
    }
}

impl MahavishnuError {
    fn kind(&self) -> &'static str {
        match self {
            MahavishnuError::Overloaded(_) => "overloaded",
            MahavishnuError::NoPoolAvailable(_) => "no_pool_available",
            MahavishnuError::CircuitOpen(_) => "circuit_open",
            MahavishnuError::RateLimited(_) => "rate_limited",
            MahavishnuError::Bus(_) => "bus_error",
            MahavishnuError::Busy(_) => "busy",
            MahavishnuError::BadRequest(_) => "bad_request",
            MahavishnuError::Internal => "internal",
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            MahavishnuError::Overloaded(e) => Some(e.retry_after),
            MahavishnuError::CircuitOpen(e) => Some(e.retry_after),
            MahavishnuError::RateLimited(e) => Some(e.retry_after),
            _ => None,
        }
    }
}

impl SafeDisplay for MahavishnuError {
    fn to_safe_string(&self) -> String {
        match self {
            MahavishnuError::Internal => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

/// `{ok, data, error:{kind, message, retry_after?}}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultEnvelope<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<EnvelopeError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub kind: String,
    pub message: String,
    pub retry_after_ms: Option<u64>,
}

impl<T> ResultEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: &MahavishnuError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(EnvelopeError {
                kind: error.kind().to_string(),
                message: error.to_safe_string(),
                retry_after_ms: error.retry_after().map(|d| d.as_millis() as u64),
            }),
        }
    }

    pub fn from_result(result: Result<T, MahavishnuError>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(e) => Self::err(&e),
        }
    }
}

pub type BoxedHandler =
    Arc<dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = serde_json::Value> + Send>> + Send + Sync>;

/// Registration-points boundary the tool-protocol server framework is
/// expected to call into; the transport itself (HTTP/RPC) is out of scope.
pub trait ToolTransport {
    fn register(&mut self, name: &'static str, handler: BoxedHandler);
}

#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<&'static str, BoxedHandler>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, handler: BoxedHandler) {
        self.handlers.insert(name, handler);
    }

    pub async fn dispatch(&self, name: &str, params: serde_json::Value) -> serde_json::Value {
        let Some(handler) = self.handlers.get(name) else {
            return serde_json::to_value(ResultEnvelope::<()>::err(&MahavishnuError::BadRequest(
                format!("unknown endpoint: {name}"),
            )))
            .expect("envelope always serializes");
        };
        handler(params).await
    }

    pub fn register_into(&self, transport: &mut dyn ToolTransport) {
        for (name, handler) in &self.handlers {
            transport.register(name, handler.clone());
        }
    }
}

/// Wraps a handler body so a panic inside it is caught and reported as
/// `MahavishnuError::Internal` rather than unwinding through the
/// tool-protocol transport: endpoints always return a structured envelope,
/// never unwind with unstructured panics.
pub fn guarded<F, Fut, T>(operation: &'static str, body: F) -> Pin<Box<dyn Future<Output = ResultEnvelope<T>> + Send>>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, MahavishnuError>> + Send + 'static,
    T: Send + 'static,
{
    Box::pin(async move {
        match tokio::spawn(body()).await {
            Ok(result) => ResultEnvelope::from_result(result),
            Err(join_error) => {
                error!(operation, error = %join_error, "tool handler panicked");
                ResultEnvelope::err(&MahavishnuError::Internal)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[tokio::test]
    async fn guarded_converts_panics_to_internal_error() {
        let result: ResultEnvelope<u32> = guarded("test.panics", || async {
            panic!("boom");
            #[allow(unreachable_code)]
            Ok(0)
        })
        .await;
        assert!(!result.ok);
        assert_eq!(result.error.unwrap().kind, "internal");
    }

    #[tokio::test]
    async fn guarded_passes_through_success() {
        let result: ResultEnvelope<u32> = guarded("test.ok", || async { Ok(42) }).await;
        assert!(result.ok);
        assert_eq!(result.data, Some(42));
    }
}
