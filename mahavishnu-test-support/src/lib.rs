//! Fake collaborators and fixture builders for exercising
//! `mahavishnu-core` without real subprocesses, containers, or peer
//! orchestrators.

use async_trait::async_trait;
use mahavishnu_core::worker::launcher::{
    ContainerHandle, ContainerRuntime, ContainerRuntimeError, ContainerSpec, RemoteDelegateError,
    RemoteOrchestratorClient, RemoteTaskHandle,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Always succeeds; echoes the exec payload back as the artifact.
pub struct FakeContainerRuntime {
    pub fail_next_start: AtomicU32,
    exec_delay: Mutex<Duration>,
}

impl Default for FakeContainerRuntime {
    fn default() -> Self {
        Self {
            fail_next_start: AtomicU32::new(0),
            exec_delay: Mutex::new(Duration::ZERO),
        }
    }
}

impl FakeContainerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next N `start` calls fail transiently, to exercise the
    /// worker manager's retry path.
    pub fn fail_next_starts(self, n: u32) -> Self {
        self.fail_next_start.store(n, Ordering::SeqCst);
        self
    }

    /// Holds every `exec` call open for `delay`, so tests can force tasks to
    /// overlap and exercise pool admission/queueing.
    pub fn with_exec_delay(self, delay: Duration) -> Self {
        *self.exec_delay.lock().unwrap() = delay;
        self
    }
}

#[async_trait]
impl ContainerRuntime for FakeContainerRuntime {
    async fn image_available(&self, _image: &str) -> bool {
        true
    }

    async fn start(&self, _spec: &ContainerSpec) -> Result<ContainerHandle, ContainerRuntimeError> {
        let remaining = self.fail_next_start.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_start.fetch_sub(1, Ordering::SeqCst);
            return Err(ContainerRuntimeError::Transient(
                "fake transient start failure".to_string(),
            ));
        }
        Ok(ContainerHandle("fake-container".to_string()))
    }

    async fn exec(
        &self,
        _handle: &ContainerHandle,
        payload: &[u8],
    ) -> Result<Vec<u8>, ContainerRuntimeError> {
        let delay = *self.exec_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(payload.to_vec())
    }

    async fn stop(&self, _handle: &ContainerHandle) {}
}

/// Echoes the forwarded payload back as a single stream chunk, then reports
/// the stream as exhausted.
#[derive(Default)]
pub struct FakeRemoteOrchestratorClient {
    delivered: Mutex<std::collections::HashMap<String, bool>>,
}

impl FakeRemoteOrchestratorClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteOrchestratorClient for FakeRemoteOrchestratorClient {
    async fn forward_task(
        &self,
        endpoint: &str,
        payload: &[u8],
    ) -> Result<RemoteTaskHandle, RemoteDelegateError> {
        let handle = format!("{endpoint}:{}", uuid::Uuid::new_v4());
        self.delivered
            .lock()
            .unwrap()
            .insert(handle.clone(), false);
        let _ = payload;
        Ok(RemoteTaskHandle(handle))
    }

    async fn poll_stream(
        &self,
        handle: &RemoteTaskHandle,
    ) -> Result<Vec<Vec<u8>>, RemoteDelegateError> {
        let mut delivered = self.delivered.lock().unwrap();
        match delivered.get_mut(&handle.0) {
            Some(already) if !*already => {
                *already = true;
                Ok(vec![b"fake-remote-output".to_vec()])
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn cancel(&self, _handle: &RemoteTaskHandle) {}
}

pub use mahavishnu_core::worker::launcher::NullProcessLauncher;

pub use mahavishnu_core::bus::store::MemoryBusStore as InMemoryBusStore;

pub use mahavishnu_common::clock::ManualClock;

/// A `PoolConfig` with conservative local-pool defaults, for tests that
/// only care about scaling/routing behaviour, not a specific worker kind.
pub fn local_pool_config(
    min_workers: usize,
    max_workers: usize,
    strategy: mahavishnu_core::model::IntraPoolStrategy,
    command: &str,
    args: Vec<String>,
) -> mahavishnu_core::pool::PoolConfig {
    mahavishnu_core::pool::PoolConfig {
        pool_kind: mahavishnu_core::model::PoolKind::Local,
        worker_kind: mahavishnu_core::model::WorkerKind::SubprocessAi,
        min_workers,
        max_workers,
        strategy,
        launcher_metadata: mahavishnu_core::worker::launcher::LauncherMetadata::SubprocessAi(
            mahavishnu_core::worker::launcher::SubprocessSpec {
                command: command.to_string(),
                args,
                env: Default::default(),
            },
        ),
        queue_depth: None,
        spawn_budget: std::time::Duration::from_secs(30),
        fault_window: std::time::Duration::from_secs(60),
        degraded_fault_ratio: 0.5,
    }
}

#[cfg(test)]
test_r::enable!();

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[tokio::test]
    async fn fake_container_runtime_echoes_payload() {
        let runtime = FakeContainerRuntime::new();
        let handle = runtime
            .start(&ContainerSpec {
                image: "img".into(),
                command: vec![],
                max_transient_retries: 1,
            })
            .await
            .unwrap();
        let out = runtime.exec(&handle, b"hi").await.unwrap();
        assert_eq!(out, b"hi");
    }
}
