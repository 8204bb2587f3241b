//! Sliding window + token bucket rate limiter.
//!
//! An allow decision requires both checks to pass. State is per-key
//! `(subject, tool_name)`, each key guarded by its own lock so no single
//! global lock serializes unrelated callers.

use crate::error::RateLimited;
use dashmap::DashMap;
use mahavishnu_common::clock::Clock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sliding window length.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Max requests admitted per window (excluding burst).
    pub window_limit: u32,
    /// Token bucket burst capacity.
    pub burst: u32,
    /// Token bucket refill rate, tokens per second.
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            window_limit: 20,
            burst: 10,
            refill_per_sec: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub subject: String,
    pub tool_name: String,
}

struct KeyState {
    window_samples: VecDeque<Instant>,
    tokens: f64,
    last_refill: Instant,
}

impl KeyState {
    fn new(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            window_samples: VecDeque::new(),
            tokens: config.burst as f64,
            last_refill: now,
        }
    }
}

pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    default_config: RateLimitConfig,
    per_tool_config: DashMap<String, RateLimitConfig>,
    exempt_subjects: dashmap::DashSet<String>,
    state: DashMap<RateLimitKey, Mutex<KeyState>>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, default_config: RateLimitConfig) -> Self {
        Self {
            clock,
            default_config,
            per_tool_config: DashMap::new(),
            exempt_subjects: dashmap::DashSet::new(),
            state: DashMap::new(),
        }
    }

    pub fn configure_tool(&self, tool_name: impl Into<String>, config: RateLimitConfig) {
        self.per_tool_config.insert(tool_name.into(), config);
    }

    pub fn exempt(&self, subject: impl Into<String>) {
        self.exempt_subjects.insert(subject.into());
    }

    fn config_for(&self, tool_name: &str) -> RateLimitConfig {
        self.per_tool_config
            .get(tool_name)
            .map(|c| c.clone())
            .unwrap_or_else(|| self.default_config.clone())
    }

    /// Returns `Ok(())` if admitted, `Err(RateLimited)` with a retry hint
    /// otherwise. The hint is the smaller of "time until one token refills"
    /// and "time until the oldest window sample falls out".
    pub fn check(&self, subject: &str, tool_name: &str) -> Result<(), RateLimited> {
        if self.exempt_subjects.contains(subject) {
            return Ok(());
        }
        let key = RateLimitKey {
            subject: subject.to_string(),
            tool_name: tool_name.to_string(),
        };
        let config = self.config_for(tool_name);
        let now = self.clock.now();

        let entry = self
            .state
            .entry(key.clone())
            .or_insert_with(|| Mutex::new(KeyState::new(&config, now)));
        let mut state = entry.lock().unwrap();

        // Sliding window check.
        while let Some(&oldest) = state.window_samples.front() {
            if now.duration_since(oldest) > config.window {
                state.window_samples.pop_front();
            } else {
                break;
            }
        }
        let window_ok = (state.window_samples.len() as u32) < config.window_limit;

        // Token bucket refill.
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * config.refill_per_sec).min(config.burst as f64);
        state.last_refill = now;
        let bucket_ok = state.tokens >= 1.0;

        if window_ok && bucket_ok {
            state.window_samples.push_back(now);
            state.tokens -= 1.0;
            Ok(())
        } else {
            let window_retry = state
                .window_samples
                .front()
                .map(|&oldest| config.window.saturating_sub(now.duration_since(oldest)))
                .unwrap_or(Duration::ZERO);
            let bucket_retry = if bucket_ok {
                Duration::ZERO
            } else {
                Duration::from_secs_f64(((1.0 - state.tokens) / config.refill_per_sec).max(0.0))
            };
            let retry_after = if !window_ok && !bucket_ok {
                window_retry.min(bucket_retry)
            } else if !window_ok {
                window_retry
            } else {
                bucket_retry
            };
            Err(RateLimited {
                subject: subject.to_string(),
                tool_name: tool_name.to_string(),
                retry_after,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mahavishnu_common::clock::ManualClock;
    use test_r::test;

    #[test]
    fn admits_up_to_window_limit_then_denies() {
        let clock = ManualClock::new();
        let config = RateLimitConfig {
            window: Duration::from_secs(1),
            window_limit: 3,
            burst: 100,
            refill_per_sec: 1000.0,
        };
        let limiter = RateLimiter::new(clock.clone(), config);
        for _ in 0..3 {
            assert!(limiter.check("alice", "pool.execute").is_ok());
        }
        assert!(limiter.check("alice", "pool.execute").is_err());
    }

    #[test]
    fn window_sample_expiry_readmits() {
        let clock = ManualClock::new();
        let config = RateLimitConfig {
            window: Duration::from_millis(100),
            window_limit: 1,
            burst: 100,
            refill_per_sec: 1000.0,
        };
        let limiter = RateLimiter::new(clock.clone(), config);
        assert!(limiter.check("bob", "t").is_ok());
        assert!(limiter.check("bob", "t").is_err());
        clock.advance(Duration::from_millis(150));
        assert!(limiter.check("bob", "t").is_ok());
    }

    #[test]
    fn token_bucket_denies_when_burst_exhausted() {
        let clock = ManualClock::new();
        let config = RateLimitConfig {
            window: Duration::from_secs(100),
            window_limit: 1000,
            burst: 2,
            refill_per_sec: 0.0001,
        };
        let limiter = RateLimiter::new(clock.clone(), config);
        assert!(limiter.check("carol", "t").is_ok());
        assert!(limiter.check("carol", "t").is_ok());
        assert!(limiter.check("carol", "t").is_err());
    }

    #[test]
    fn exempt_subjects_bypass_both_checks() {
        let clock = ManualClock::new();
        let config = RateLimitConfig {
            window: Duration::from_secs(1),
            window_limit: 1,
            burst: 1,
            refill_per_sec: 0.0,
        };
        let limiter = RateLimiter::new(clock.clone(), config);
        limiter.exempt("admin");
        for _ in 0..10 {
            assert!(limiter.check("admin", "t").is_ok());
        }
    }
}
