//! End-to-end scenarios against a real `Registry`, backed by the fakes in
//! `mahavishnu-test-support` instead of real subprocesses/containers/peers.

test_r::enable!();

pub mod breaker_trips;
pub mod cancellation;
pub mod message_priority;
pub mod overload;
pub mod routing;
pub mod spawn_and_execute;

use mahavishnu_common::clock::ManualClock;
use mahavishnu_common::metrics::noop_sink;
use mahavishnu_core::breaker::BreakerConfig;
use mahavishnu_common::ids::TaskId;
use mahavishnu_core::model::{
    IntraPoolStrategy, InterPoolStrategy, PoolKind, Priority, Task, TaskKind, TaskPayload,
    WorkerKind,
};
use mahavishnu_core::pool::PoolConfig;
use mahavishnu_core::ratelimit::RateLimitConfig;
use mahavishnu_core::registry::Registry;
use mahavishnu_core::worker::launcher::{ContainerSpec, DelegateSpec, LauncherMetadata};
use mahavishnu_test_support::{
    FakeContainerRuntime, FakeRemoteOrchestratorClient, InMemoryBusStore, NullProcessLauncher,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A `Registry` wired with fakes and a `ManualClock`, so tests control task
/// deadlines deterministically. `container_runtime` is exposed separately so
/// a scenario can tune its fake latency before pools are created.
pub fn test_registry(
    strategy: InterPoolStrategy,
    container_runtime: Arc<FakeContainerRuntime>,
) -> (Arc<Registry>, Arc<ManualClock>) {
    let clock = ManualClock::new();
    let registry = Arc::new(Registry::new(
        clock.clone(),
        noop_sink(),
        container_runtime,
        Arc::new(FakeRemoteOrchestratorClient::new()),
        Arc::new(NullProcessLauncher),
        Arc::new(InMemoryBusStore::new()),
        strategy,
        RateLimitConfig::default(),
        BreakerConfig::default(),
    ));
    (registry, clock)
}

/// A `container` pool backed by the fake runtime, which just echoes the
/// task payload back as the artifact.
pub fn container_pool_config(min: usize, max: usize, queue_depth: Option<usize>) -> PoolConfig {
    PoolConfig {
        pool_kind: PoolKind::Container,
        worker_kind: WorkerKind::Container,
        min_workers: min,
        max_workers: max,
        strategy: IntraPoolStrategy::RoundRobin,
        launcher_metadata: LauncherMetadata::Container(ContainerSpec {
            image: "fake-image".to_string(),
            command: Vec::new(),
            max_transient_retries: 1,
        }),
        queue_depth,
        spawn_budget: Duration::from_secs(5),
        fault_window: Duration::from_secs(60),
        degraded_fault_ratio: 0.5,
    }
}

/// A `delegated` pool backed by the fake peer-orchestrator client.
pub fn delegated_pool_config(min: usize, max: usize) -> PoolConfig {
    PoolConfig {
        pool_kind: PoolKind::Delegated,
        worker_kind: WorkerKind::RemoteDelegate,
        min_workers: min,
        max_workers: max,
        strategy: IntraPoolStrategy::RoundRobin,
        launcher_metadata: LauncherMetadata::RemoteDelegate(DelegateSpec {
            peer_endpoint: "fake://peer".to_string(),
        }),
        queue_depth: None,
        spawn_budget: Duration::from_secs(5),
        fault_window: Duration::from_secs(60),
        degraded_fault_ratio: 0.5,
    }
}

/// A `container-exec` task with the given payload, deadline, and optional
/// pool pinning.
pub fn make_task(
    payload: &[u8],
    deadline_from_now: Duration,
    requested_pool_kind: Option<mahavishnu_core::model::PoolKind>,
) -> Task {
    Task {
        task_id: TaskId::new(),
        kind: TaskKind::ContainerExec,
        payload: TaskPayload {
            bytes: payload.to_vec(),
            params: Default::default(),
        },
        deadline: Instant::now() + deadline_from_now,
        priority: Priority::Normal,
        requested_pool_kind,
        affinity_key: None,
    }
}
