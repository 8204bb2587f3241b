use mahavishnu_common::ids::{PoolId, WorkerId};
use mahavishnu_common::SafeDisplay;
use std::time::Duration;
use thiserror::Error;

/// Each kind below records only what callers can safely act on (no
/// internal error payloads are embedded by reference - they are rendered
/// to strings at the boundary so `SafeDisplay` never needs to reach into a
/// third-party error).
#[derive(Debug, Error, Clone)]
pub enum SpawnError {
    #[error("transient spawn failure: {0}")]
    Transient(String),
    #[error("permanent spawn failure: {0}")]
    Permanent(String),
}

#[derive(Debug, Error, Clone)]
#[error("worker {worker_id} is already executing a task")]
pub struct BusyError {
    pub worker_id: WorkerId,
}

#[derive(Debug, Error, Clone)]
#[error("pool {pool_id} is overloaded, retry after {retry_after:?}")]
pub struct Overloaded {
    pub pool_id: PoolId,
    pub retry_after: Duration,
}

#[derive(Debug, Error, Clone)]
#[error("no healthy pool available for the requested routing")]
pub struct NoPoolAvailable;

#[derive(Debug, Error, Clone)]
#[error("circuit open for adapter {adapter}, retry after {retry_after:?}")]
pub struct CircuitOpen {
    pub adapter: String,
    pub retry_after: Duration,
}

#[derive(Debug, Error, Clone)]
#[error("rate limited for key {subject}/{tool_name}, retry after {retry_after:?}")]
pub struct RateLimited {
    pub subject: String,
    pub tool_name: String,
    pub retry_after: Duration,
}

#[derive(Debug, Error, Clone)]
#[error("unauthenticated: {0}")]
pub struct Unauthenticated(pub String);

#[derive(Debug, Error, Clone)]
#[error("invalid status transition: {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub to: &'static str,
}

#[derive(Debug, Error, Clone)]
#[error("failed to parse worker stream: {0}")]
pub struct StreamParseError(pub String);

#[derive(Debug, Error, Clone)]
#[error("backing store unavailable: {0}")]
pub struct StoreUnavailable(pub String);

/// Errors surfaced by the Pool Manager's `execute`, combining admission
/// and dispatch failure modes.
#[derive(Debug, Error, Clone)]
pub enum PoolExecuteError {
    #[error(transparent)]
    Overloaded(#[from] Overloaded),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("pool is closed or closing")]
    Closed,
}

#[derive(Debug, Error, Clone)]
pub enum RouteError {
    #[error(transparent)]
    NoPoolAvailable(#[from] NoPoolAvailable),
}

#[derive(Debug, Error, Clone)]
pub enum BusError {
    #[error("unknown repository: {0}")]
    UnknownRepo(String),
    #[error(transparent)]
    Unauthenticated(#[from] Unauthenticated),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error(transparent)]
    StoreUnavailable(#[from] StoreUnavailable),
}

macro_rules! safe_display_via_display {
    ($ty:ty) => {
        impl SafeDisplay for $ty {
            fn to_safe_string(&self) -> String {
                self.to_string()
            }
        }
    };
}

safe_display_via_display!(SpawnError);
safe_display_via_display!(BusyError);
safe_display_via_display!(Overloaded);
safe_display_via_display!(NoPoolAvailable);
safe_display_via_display!(CircuitOpen);
safe_display_via_display!(RateLimited);
safe_display_via_display!(Unauthenticated);
safe_display_via_display!(InvalidTransition);
safe_display_via_display!(StreamParseError);
safe_display_via_display!(StoreUnavailable);
safe_display_via_display!(PoolExecuteError);
safe_display_via_display!(RouteError);
safe_display_via_display!(BusError);
