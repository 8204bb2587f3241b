//! Scenario: spawn a pool, execute a task against it, get back a
//! `Completed` result carrying the expected artifact.

use super::{container_pool_config, make_task, test_registry};
use mahavishnu_core::model::{InterPoolStrategy, ResultStatus};
use mahavishnu_test_support::FakeContainerRuntime;
use std::sync::Arc;
use std::time::Duration;
use test_r::test;

#[tokio::test]
async fn spawns_a_pool_and_executes_a_task_to_completion() {
    let (registry, _clock) = test_registry(
        InterPoolStrategy::LeastLoaded,
        Arc::new(FakeContainerRuntime::new()),
    );

    let pool_id = registry
        .pool_manager
        .create_pool(container_pool_config(1, 1, None))
        .await
        .unwrap();

    let task = make_task(b"hello orchestrator", Duration::from_secs(5), None);
    let result = registry
        .pool_manager
        .execute(&pool_id, task)
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::Completed);
    assert_eq!(result.artifact, b"hello orchestrator");

    let snapshot = registry.pool_manager.snapshot(&pool_id).unwrap();
    assert_eq!(snapshot.current_size, 1);
    assert_eq!(snapshot.inflight, 0);
}
