//! Scenario: cancelling a long-running task resolves it to `Cancelled`
//! well inside the drain window, and leaves the worker idle again.

use super::{make_task, test_registry};
use mahavishnu_core::model::{InterPoolStrategy, ResultStatus, WorkerKind, WorkerState};
use mahavishnu_core::pool::memory::InMemoryMemoryHandle;
use mahavishnu_core::worker::launcher::{ContainerSpec, LauncherMetadata};
use mahavishnu_test_support::FakeContainerRuntime;
use std::sync::Arc;
use std::time::Duration;
use test_r::test;

#[tokio::test]
async fn cancel_at_one_second_resolves_within_five_seconds_and_frees_the_worker() {
    let runtime = Arc::new(FakeContainerRuntime::new().with_exec_delay(Duration::from_secs(30)));
    let (registry, _clock) = test_registry(InterPoolStrategy::LeastLoaded, runtime);

    let worker_id = registry
        .worker_manager
        .spawn(
            WorkerKind::Container,
            LauncherMetadata::Container(ContainerSpec {
                image: "fake-image".to_string(),
                command: Vec::new(),
                max_transient_retries: 1,
            }),
            Arc::new(InMemoryMemoryHandle::new()),
        )
        .await
        .unwrap();

    let task = make_task(b"long-running", Duration::from_secs(60), None);
    let wm = registry.worker_manager.clone();
    let execute_worker_id = worker_id.clone();
    let handle = tokio::spawn(async move { wm.execute(&execute_worker_id, task).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    registry.worker_manager.cancel(&worker_id).await;

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("cancellation should resolve within the drain window")
        .unwrap()
        .unwrap();

    assert_eq!(result.status, ResultStatus::Cancelled);

    let meta = registry.worker_manager.worker_meta(&worker_id).unwrap();
    assert_eq!(meta.state, WorkerState::Idle);
    assert!(meta.current_task_id.is_none());
}
