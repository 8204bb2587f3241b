//! Scenario: more concurrent tasks arrive than a pool's worker plus its
//! admission queue can hold; the overflow fails fast with `Overloaded`
//! while the admitted tasks still complete.

use super::{container_pool_config, make_task, test_registry};
use mahavishnu_core::error::PoolExecuteError;
use mahavishnu_core::model::{InterPoolStrategy, ResultStatus};
use mahavishnu_test_support::FakeContainerRuntime;
use std::sync::Arc;
use std::time::Duration;
use test_r::test;

#[tokio::test]
async fn excess_concurrent_tasks_are_rejected_while_admitted_ones_complete() {
    let runtime = Arc::new(FakeContainerRuntime::new().with_exec_delay(Duration::from_millis(200)));
    let (registry, _clock) = test_registry(InterPoolStrategy::LeastLoaded, runtime);

    let pool_id = registry
        .pool_manager
        .create_pool(container_pool_config(1, 1, Some(2)))
        .await
        .unwrap();

    let tasks = (0..4).map(|i| {
        make_task(
            format!("payload-{i}").as_bytes(),
            Duration::from_secs(10),
            None,
        )
    });

    let results = futures::future::join_all(
        tasks.map(|task| registry.pool_manager.execute(&pool_id, task)),
    )
    .await;

    let completed = results
        .iter()
        .filter(|r| matches!(r, Ok(res) if res.status == ResultStatus::Completed))
        .count();
    let overloaded = results
        .iter()
        .filter(|r| matches!(r, Err(PoolExecuteError::Overloaded(_))))
        .count();

    assert_eq!(overloaded, 1, "exactly one task should overflow the queue: {results:?}");
    assert_eq!(completed, 3, "the worker plus its two queue slots should all finish: {results:?}");
}
