//! Per-adapter circuit breaker.
//!
//! `closed -> open` on `threshold` failures inside the trailing window,
//! `open -> half-open` after `cooldown`, `half-open -> closed` on one
//! success / `half-open -> open` on any failure. Retries inside
//! closed/half-open use `mahavishnu_common::retries` backoff.

use crate::error::CircuitOpen;
use dashmap::DashMap;
use mahavishnu_common::clock::Clock;
use mahavishnu_common::retries::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub failure_window: Duration,
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    pub retries: RetryConfig,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_window: Duration::from_secs(30),
            cooldown: Duration::from_secs(10),
            retries: RetryConfig::default(),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for BreakerState {
    fn from(value: u8) -> Self {
        match value {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

struct AdapterBreaker {
    state: AtomicU8,
    failures: Mutex<VecDeque<Instant>>,
    opened_at: Mutex<Option<Instant>>,
    half_open_in_flight: Mutex<bool>,
}

impl AdapterBreaker {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(BreakerState::Closed as u8),
            failures: Mutex::new(VecDeque::new()),
            opened_at: Mutex::new(None),
            half_open_in_flight: Mutex::new(false),
        }
    }

    fn state(&self) -> BreakerState {
        self.state.load(Ordering::SeqCst).into()
    }
}

/// Registry of per-adapter breakers, constructed once at startup and passed
/// by reference to handlers as a first-class service rather than an
/// implicit global.
pub struct CircuitBreakerRegistry {
    clock: Arc<dyn Clock>,
    default_config: BreakerConfig,
    per_adapter_config: DashMap<String, BreakerConfig>,
    breakers: DashMap<String, Arc<AdapterBreaker>>,
}

/// A permit to make one call through the breaker; the caller must report
/// the outcome via `record_success` / `record_failure`.
pub struct CallPermit {
    adapter: String,
    was_half_open_probe: bool,
}

impl CircuitBreakerRegistry {
    pub fn new(clock: Arc<dyn Clock>, default_config: BreakerConfig) -> Self {
        Self {
            clock,
            default_config,
            per_adapter_config: DashMap::new(),
            breakers: DashMap::new(),
        }
    }

    pub fn configure(&self, adapter: impl Into<String>, config: BreakerConfig) {
        self.per_adapter_config.insert(adapter.into(), config);
    }

    fn config_for(&self, adapter: &str) -> BreakerConfig {
        self.per_adapter_config
            .get(adapter)
            .map(|c| c.clone())
            .unwrap_or_else(|| self.default_config.clone())
    }

    fn breaker_for(&self, adapter: &str) -> Arc<AdapterBreaker> {
        self.breakers
            .entry(adapter.to_string())
            .or_insert_with(|| Arc::new(AdapterBreaker::new()))
            .clone()
    }

    /// Tries to acquire a call permit. In `open` state fails fast with
    /// `CircuitOpen` and performs no adapter I/O. In `half-open`, admits
    /// exactly one probing call; concurrent callers are also denied fast
    /// until that probe resolves.
    pub fn try_call(&self, adapter: &str) -> Result<CallPermit, CircuitOpen> {
        let config = self.config_for(adapter);
        let breaker = self.breaker_for(adapter);
        let now = self.clock.now();

        match breaker.state() {
            BreakerState::Closed => Ok(CallPermit {
                adapter: adapter.to_string(),
                was_half_open_probe: false,
            }),
            BreakerState::Open => {
                let opened_at = breaker.opened_at.lock().unwrap();
                let elapsed = opened_at.map(|o| now.duration_since(o)).unwrap_or_default();
                if elapsed >= config.cooldown {
                    drop(opened_at);
                    breaker
                        .state
                        .store(BreakerState::HalfOpen as u8, Ordering::SeqCst);
                    let mut in_flight = breaker.half_open_in_flight.lock().unwrap();
                    if *in_flight {
                        return Err(CircuitOpen {
                            adapter: adapter.to_string(),
                            retry_after: Duration::ZERO,
                        });
                    }
                    *in_flight = true;
                    info!(adapter, "breaker half-open: admitting one probe call");
                    Ok(CallPermit {
                        adapter: adapter.to_string(),
                        was_half_open_probe: true,
                    })
                } else {
                    Err(CircuitOpen {
                        adapter: adapter.to_string(),
                        retry_after: config.cooldown - elapsed,
                    })
                }
            }
            BreakerState::HalfOpen => {
                let mut in_flight = breaker.half_open_in_flight.lock().unwrap();
                if *in_flight {
                    Err(CircuitOpen {
                        adapter: adapter.to_string(),
                        retry_after: Duration::ZERO,
                    })
                } else {
                    *in_flight = true;
                    Ok(CallPermit {
                        adapter: adapter.to_string(),
                        was_half_open_probe: true,
                    })
                }
            }
        }
    }

    pub fn record_success(&self, permit: CallPermit) {
        let breaker = self.breaker_for(&permit.adapter);
        if permit.was_half_open_probe {
            *breaker.half_open_in_flight.lock().unwrap() = false;
        }
        breaker.failures.lock().unwrap().clear();
        breaker
            .state
            .store(BreakerState::Closed as u8, Ordering::SeqCst);
        info!(adapter = %permit.adapter, "breaker closed");
    }

    pub fn record_failure(&self, permit: CallPermit) {
        let config = self.config_for(&permit.adapter);
        let breaker = self.breaker_for(&permit.adapter);
        let now = self.clock.now();

        if permit.was_half_open_probe {
            *breaker.half_open_in_flight.lock().unwrap() = false;
            breaker
                .state
                .store(BreakerState::Open as u8, Ordering::SeqCst);
            *breaker.opened_at.lock().unwrap() = Some(now);
            warn!(adapter = %permit.adapter, "breaker re-opened after failed probe");
            return;
        }

        let mut failures = breaker.failures.lock().unwrap();
        failures.push_back(now);
        while let Some(&oldest) = failures.front() {
            if now.duration_since(oldest) > config.failure_window {
                failures.pop_front();
            } else {
                break;
            }
        }
        if failures.len() as u32 >= config.failure_threshold {
            breaker
                .state
                .store(BreakerState::Open as u8, Ordering::SeqCst);
            *breaker.opened_at.lock().unwrap() = Some(now);
            warn!(adapter = %permit.adapter, failures = failures.len(), "breaker opened");
        }
    }

    pub fn state_of(&self, adapter: &str) -> BreakerState {
        self.breaker_for(adapter).state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mahavishnu_common::clock::ManualClock;
    use test_r::test;

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            failure_window: Duration::from_secs(30),
            cooldown: Duration::from_secs(10),
            retries: RetryConfig::default(),
        }
    }

    #[test]
    fn trips_after_threshold_failures_then_recovers() {
        let clock = ManualClock::new();
        let registry = CircuitBreakerRegistry::new(clock.clone(), config());

        for _ in 0..3 {
            let permit = registry.try_call("rag").expect("closed admits calls");
            registry.record_failure(permit);
        }
        assert_eq!(registry.state_of("rag"), BreakerState::Open);
        assert!(registry.try_call("rag").is_err());

        clock.advance(Duration::from_secs(11));
        let permit = registry
            .try_call("rag")
            .expect("half-open admits one probe");
        registry.record_success(permit);
        assert_eq!(registry.state_of("rag"), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let clock = ManualClock::new();
        let registry = CircuitBreakerRegistry::new(clock.clone(), config());
        for _ in 0..3 {
            let permit = registry.try_call("rag").unwrap();
            registry.record_failure(permit);
        }
        clock.advance(Duration::from_secs(11));
        let permit = registry.try_call("rag").unwrap();
        registry.record_failure(permit);
        assert_eq!(registry.state_of("rag"), BreakerState::Open);
    }
}
