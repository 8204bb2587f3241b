//! `worker.*` tool endpoints over the Worker Manager.

use crate::endpoints::pool::{TaskRequest, TaskResultResponse};
use crate::tool_surface::MahavishnuError;
use mahavishnu_common::ids::WorkerId;
use mahavishnu_core::model::{WorkerKind, WorkerMeta, WorkerState};
use mahavishnu_core::pool::memory::InMemoryMemoryHandle;
use mahavishnu_core::registry::Registry;
use mahavishnu_core::worker::launcher::LauncherMetadata;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct WorkerSpawnRequest {
    pub kind: WorkerKind,
    pub launcher_metadata: LauncherMetadata,
}

#[derive(Debug, Serialize)]
pub struct WorkerSpawnResponse {
    pub worker_id: WorkerId,
}

/// A worker spawned outside a pool (direct tool-surface call, not
/// `pool.create_pool`/`scale`) gets its own standalone memory handle —
/// only a `debug-monitor` worker ever touches it, and it has no pool to
/// share one with.
pub async fn worker_spawn(
    registry: &Registry,
    req: WorkerSpawnRequest,
) -> Result<WorkerSpawnResponse, MahavishnuError> {
    let worker_id = registry
        .worker_manager
        .spawn(
            req.kind,
            req.launcher_metadata,
            Arc::new(InMemoryMemoryHandle::new()),
        )
        .await
        .map_err(|e| MahavishnuError::BadRequest(e.to_string()))?;
    Ok(WorkerSpawnResponse { worker_id })
}

#[derive(Debug, Deserialize)]
pub struct WorkerExecuteRequest {
    pub worker_id: WorkerId,
    pub task: TaskRequest,
}

pub async fn worker_execute(
    registry: &Registry,
    req: WorkerExecuteRequest,
) -> Result<TaskResultResponse, MahavishnuError> {
    let task = req.task.into_task(registry.clock.now());
    let result = registry
        .worker_manager
        .execute(&req.worker_id, task)
        .await?;
    Ok(result.into())
}

#[derive(Debug, Deserialize)]
pub struct WorkerExecuteBatchRequest {
    pub worker_id: WorkerId,
    pub tasks: Vec<TaskRequest>,
}

#[derive(Debug, Serialize)]
pub struct WorkerExecuteBatchResponse {
    pub results: Vec<TaskResultResponse>,
}

/// Sequential, since a worker only ever holds one task at a time; a batch
/// is sugar for N ordered `execute` calls against the same worker, not
/// concurrent fan-out.
pub async fn worker_execute_batch(
    registry: &Registry,
    req: WorkerExecuteBatchRequest,
) -> Result<WorkerExecuteBatchResponse, MahavishnuError> {
    let mut results = Vec::with_capacity(req.tasks.len());
    for task_req in req.tasks {
        let task = task_req.into_task(registry.clock.now());
        let result = registry
            .worker_manager
            .execute(&req.worker_id, task)
            .await?;
        results.push(result.into());
    }
    Ok(WorkerExecuteBatchResponse { results })
}

#[derive(Debug, Serialize)]
pub struct WorkerMetaResponse {
    pub worker_id: WorkerId,
    pub kind: WorkerKind,
    pub state: WorkerState,
    pub current_task_id: Option<String>,
}

impl From<WorkerMeta> for WorkerMetaResponse {
    fn from(m: WorkerMeta) -> Self {
        Self {
            worker_id: m.worker_id,
            kind: m.kind,
            state: m.state,
            current_task_id: m.current_task_id.map(|t| t.to_string()),
        }
    }
}

pub async fn worker_list(registry: &Registry) -> Result<Vec<WorkerMetaResponse>, MahavishnuError> {
    Ok(registry
        .worker_manager
        .worker_ids()
        .into_iter()
        .filter_map(|id| registry.worker_manager.worker_meta(&id))
        .map(WorkerMetaResponse::from)
        .collect())
}

#[derive(Debug, Deserialize)]
pub struct WorkerCloseRequest {
    pub worker_id: WorkerId,
}

pub async fn worker_close(
    registry: &Registry,
    req: WorkerCloseRequest,
) -> Result<(), MahavishnuError> {
    registry.worker_manager.close(&req.worker_id).await;
    Ok(())
}

pub async fn worker_close_all(registry: &Registry) -> Result<(), MahavishnuError> {
    for worker_id in registry.worker_manager.worker_ids() {
        registry.worker_manager.close(&worker_id).await;
    }
    Ok(())
}
