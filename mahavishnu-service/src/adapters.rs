//! Default adapters for collaborators this crate never implements
//! directly (container runtime, peer-orchestrator transport). A real
//! deployment wires concrete implementations into `Registry::new` in
//! their place; these defaults let the binary start and report a clear
//! permanent
//! failure for the pool kinds that need them, rather than requiring every
//! deployment to carry dead container/remote-delegate code paths.

use async_trait::async_trait;
use mahavishnu_core::worker::launcher::{
    ContainerHandle, ContainerRuntime, ContainerRuntimeError, ContainerSpec, RemoteDelegateError,
    RemoteOrchestratorClient, RemoteTaskHandle,
};

pub struct UnconfiguredContainerRuntime;

#[async_trait]
impl ContainerRuntime for UnconfiguredContainerRuntime {
    async fn image_available(&self, _image: &str) -> bool {
        false
    }

    async fn start(&self, _spec: &ContainerSpec) -> Result<ContainerHandle, ContainerRuntimeError> {
        Err(ContainerRuntimeError::Permanent(
            "no container runtime configured".to_string(),
        ))
    }

    async fn exec(
        &self,
        _handle: &ContainerHandle,
        _payload: &[u8],
    ) -> Result<Vec<u8>, ContainerRuntimeError> {
        Err(ContainerRuntimeError::Permanent(
            "no container runtime configured".to_string(),
        ))
    }

    async fn stop(&self, _handle: &ContainerHandle) {}
}

pub struct UnconfiguredRemoteOrchestratorClient;

#[async_trait]
impl RemoteOrchestratorClient for UnconfiguredRemoteOrchestratorClient {
    async fn forward_task(
        &self,
        _endpoint: &str,
        _payload: &[u8],
    ) -> Result<RemoteTaskHandle, RemoteDelegateError> {
        Err(RemoteDelegateError::Permanent(
            "no remote orchestrator client configured".to_string(),
        ))
    }

    async fn poll_stream(
        &self,
        _handle: &RemoteTaskHandle,
    ) -> Result<Vec<Vec<u8>>, RemoteDelegateError> {
        Ok(Vec::new())
    }

    async fn cancel(&self, _handle: &RemoteTaskHandle) {}
}
