//! Launcher metadata and the opaque collaborators a launched worker talks
//! to. `LauncherMetadata` is a closed enum — adding a new worker kind means
//! adding a variant here and a matching arm in `worker::manager::spawn`,
//! not implementing a new trait somewhere else in the codebase.
//!
//! `ContainerRuntime`, `RemoteOrchestratorClient` and `ProcessLauncher` are
//! narrow, opaque interfaces to collaborators this crate never implements
//! directly: a real container runtime, a tool-protocol peer transport, and
//! terminal multiplexer capture.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LauncherMetadata {
    SubprocessAi(SubprocessSpec),
    Container(ContainerSpec),
    RemoteDelegate(DelegateSpec),
    DebugMonitor(DebugMonitorSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubprocessSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    pub max_transient_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateSpec {
    pub peer_endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugMonitorSpec {
    pub target: String,
    #[serde(with = "humantime_serde")]
    pub snapshot_interval: Duration,
}

impl Default for DebugMonitorSpec {
    fn default() -> Self {
        Self {
            target: "default".to_string(),
            snapshot_interval: Duration::from_secs(1),
        }
    }
}

/// One container image/command execution, modeled as a capability set
/// with a transient/permanent failure split so pool admission can retry.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn image_available(&self, image: &str) -> bool;
    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, ContainerRuntimeError>;
    async fn exec(
        &self,
        handle: &ContainerHandle,
        payload: &[u8],
    ) -> Result<Vec<u8>, ContainerRuntimeError>;
    async fn stop(&self, handle: &ContainerHandle);
}

#[derive(Debug, Clone)]
pub struct ContainerHandle(pub String);

#[derive(Debug, Clone, thiserror::Error)]
pub enum ContainerRuntimeError {
    #[error("transient container runtime error: {0}")]
    Transient(String),
    #[error("permanent container runtime error: {0}")]
    Permanent(String),
}

/// Peer-orchestrator transport for the `remote-delegate` worker kind; the
/// client-side registration point for a tool-protocol server framework
/// exposed elsewhere.
#[async_trait]
pub trait RemoteOrchestratorClient: Send + Sync {
    async fn forward_task(
        &self,
        endpoint: &str,
        payload: &[u8],
    ) -> Result<RemoteTaskHandle, RemoteDelegateError>;
    async fn poll_stream(
        &self,
        handle: &RemoteTaskHandle,
    ) -> Result<Vec<Vec<u8>>, RemoteDelegateError>;
    async fn cancel(&self, handle: &RemoteTaskHandle);
}

#[derive(Debug, Clone)]
pub struct RemoteTaskHandle(pub String);

#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteDelegateError {
    #[error("transient delegate transport error: {0}")]
    Transient(String),
    #[error("permanent delegate transport error: {0}")]
    Permanent(String),
}

/// Terminal screen capture for `debug-monitor` workers, treated as an
/// opaque snapshot source.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn snapshot(&self, target: &str) -> Result<Vec<u8>, String>;
}

pub struct NullProcessLauncher;

#[async_trait]
impl ProcessLauncher for NullProcessLauncher {
    async fn snapshot(&self, _target: &str) -> Result<Vec<u8>, String> {
        Ok(Vec::new())
    }
}
