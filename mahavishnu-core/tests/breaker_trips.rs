//! Scenario: repeated adapter failures trip the breaker open, and calls
//! fail fast without the adapter being invoked again, until the cooldown
//! elapses.

use super::test_registry;
use mahavishnu_core::model::InterPoolStrategy;
use mahavishnu_test_support::FakeContainerRuntime;
use std::sync::Arc;
use std::time::Duration;
use test_r::test;

#[tokio::test]
async fn threshold_failures_open_the_breaker_then_cooldown_half_opens_it() {
    let (registry, clock) = test_registry(
        InterPoolStrategy::LeastLoaded,
        Arc::new(FakeContainerRuntime::new()),
    );

    // default threshold is 3 within a 30s window.
    for _ in 0..3 {
        let permit = registry.breaker.try_call("container-runtime").unwrap();
        registry.breaker.record_failure(permit);
    }

    assert!(registry.breaker.try_call("container-runtime").is_err());

    clock.advance(Duration::from_secs(11));

    let permit = registry
        .breaker
        .try_call("container-runtime")
        .expect("cooldown elapsed, breaker should admit one half-open probe");
    registry.breaker.record_success(permit);

    assert!(registry.breaker.try_call("container-runtime").is_ok());
}
