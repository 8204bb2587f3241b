//! Scenario: a task pinned to a pool kind with no healthy pool of that kind
//! fails routing outright, even though another (differently-kinded) pool is
//! healthy.

use super::{container_pool_config, make_task, test_registry};
use mahavishnu_core::error::RouteError;
use mahavishnu_core::model::{InterPoolStrategy, PoolKind};
use mahavishnu_test_support::FakeContainerRuntime;
use std::sync::Arc;
use std::time::Duration;
use test_r::test;

#[tokio::test]
async fn pinning_to_an_unhealthy_pool_kind_fails_even_with_other_healthy_pools() {
    let (registry, _clock) = test_registry(
        InterPoolStrategy::LeastLoaded,
        Arc::new(FakeContainerRuntime::new()),
    );

    let mut healthy_local = container_pool_config(1, 1, None);
    healthy_local.pool_kind = PoolKind::Local;
    registry
        .pool_manager
        .create_pool(healthy_local)
        .await
        .unwrap();

    let mut unhealthy_container = container_pool_config(0, 0, None);
    unhealthy_container.pool_kind = PoolKind::Container;
    registry
        .pool_manager
        .create_pool(unhealthy_container)
        .await
        .unwrap();

    let task = make_task(
        b"pinned-payload",
        Duration::from_secs(5),
        Some(PoolKind::Container),
    );

    let route_result = registry.route_and_execute(task).route();
    assert!(matches!(
        route_result,
        Err(RouteError::NoPoolAvailable(_))
    ));
}
