//! `pool.*` tool endpoints over the Pool Manager and the Router.

use crate::tool_surface::MahavishnuError;
use mahavishnu_core::model::{
    HealthStatus, IntraPoolStrategy, PoolHealth, PoolKind, PoolSnapshot, Priority, TaskKind,
    WorkerKind,
};
use mahavishnu_core::pool::PoolConfig;
use mahavishnu_core::registry::Registry;
use mahavishnu_core::worker::launcher::LauncherMetadata;
use mahavishnu_common::ids::PoolId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct PoolSpawnRequest {
    pub pool_kind: PoolKind,
    pub worker_kind: WorkerKind,
    pub min_workers: usize,
    pub max_workers: usize,
    pub strategy: IntraPoolStrategy,
    pub launcher_metadata: LauncherMetadata,
    pub queue_depth: Option<usize>,
    pub spawn_budget_seconds: u64,
    pub fault_window_seconds: u64,
    pub degraded_fault_ratio: f64,
}

#[derive(Debug, Serialize)]
pub struct PoolSpawnResponse {
    pub pool_id: PoolId,
}

pub async fn pool_spawn(
    registry: &Registry,
    req: PoolSpawnRequest,
) -> Result<PoolSpawnResponse, MahavishnuError> {
    let config = PoolConfig {
        pool_kind: req.pool_kind,
        worker_kind: req.worker_kind,
        min_workers: req.min_workers,
        max_workers: req.max_workers,
        strategy: req.strategy,
        launcher_metadata: req.launcher_metadata,
        queue_depth: req.queue_depth,
        spawn_budget: Duration::from_secs(req.spawn_budget_seconds),
        fault_window: Duration::from_secs(req.fault_window_seconds),
        degraded_fault_ratio: req.degraded_fault_ratio,
    };
    let pool_id = registry
        .pool_manager
        .create_pool(config)
        .await
        .map_err(|e| MahavishnuError::BadRequest(e.to_string()))?;
    Ok(PoolSpawnResponse { pool_id })
}

/// Wire form of `mahavishnu_core::model::Task`; the kernel's `Task` carries
/// a `Clock`-relative `Instant` deadline, so endpoints translate the
/// caller's relative `deadline_ms` at the boundary.
#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    pub kind: TaskKind,
    #[serde(with = "hex::serde")]
    pub payload_hex: Vec<u8>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    pub deadline_ms: u64,
    pub priority: Priority,
    pub requested_pool_kind: Option<PoolKind>,
    pub affinity_key: Option<String>,
}

impl TaskRequest {
    pub(crate) fn into_task(self, now: std::time::Instant) -> mahavishnu_core::model::Task {
        mahavishnu_core::model::Task {
            task_id: mahavishnu_common::ids::TaskId::new(),
            kind: self.kind,
            payload: mahavishnu_core::model::TaskPayload {
                bytes: self.payload_hex,
                params: self.params,
            },
            deadline: now + Duration::from_millis(self.deadline_ms),
            priority: self.priority,
            requested_pool_kind: self.requested_pool_kind,
            affinity_key: self.affinity_key,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskResultResponse {
    pub task_id: String,
    pub worker_id: String,
    pub status: mahavishnu_core::model::ResultStatus,
    #[serde(with = "hex::serde")]
    pub artifact_hex: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub stderr_tail_hex: Vec<u8>,
    pub duration_ms: u128,
    pub stream_frames_consumed: u64,
}

impl From<mahavishnu_core::model::TaskResult> for TaskResultResponse {
    fn from(r: mahavishnu_core::model::TaskResult) -> Self {
        Self {
            task_id: r.task_id.to_string(),
            worker_id: r.worker_id.to_string(),
            status: r.status,
            artifact_hex: r.artifact,
            stderr_tail_hex: r.stderr_tail,
            duration_ms: r.duration.as_millis(),
            stream_frames_consumed: r.stream_frames_consumed,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PoolExecuteRequest {
    pub pool_id: PoolId,
    pub task: TaskRequest,
}

pub async fn pool_execute(
    registry: &Registry,
    req: PoolExecuteRequest,
) -> Result<TaskResultResponse, MahavishnuError> {
    let task = req.task.into_task(registry.clock.now());
    let result = registry
        .pool_manager
        .execute(&req.pool_id, task)
        .await?;
    Ok(result.into())
}

#[derive(Debug, Deserialize)]
pub struct PoolRouteExecuteRequest {
    pub task: TaskRequest,
}

#[derive(Debug, Serialize)]
pub struct PoolRouteExecuteResponse {
    pub pool_id: PoolId,
    pub result: TaskResultResponse,
}

/// Orders dispatch as route -> rate limit -> execute. The rate-limit
/// check keys on the task's kind, treated as the tool name for admission
/// purposes.
pub async fn pool_route_execute(
    registry: &Registry,
    req: PoolRouteExecuteRequest,
) -> Result<PoolRouteExecuteResponse, MahavishnuError> {
    let task = req.task.into_task(registry.clock.now());
    let route_and_execute = registry.route_and_execute(task);
    let pool_id = route_and_execute.route()?;

    registry
        .rate_limiter
        .check("router", &pool_id.to_string())?;

    let result = route_and_execute.dispatch(pool_id).await?;
    Ok(PoolRouteExecuteResponse {
        pool_id,
        result: result.into(),
    })
}

#[derive(Debug, Deserialize)]
pub struct PoolScaleRequest {
    pub pool_id: PoolId,
    pub target_workers: usize,
}

#[derive(Debug, Serialize)]
pub struct PoolScaleResponse {
    pub current_size: usize,
}

pub async fn pool_scale(
    registry: &Registry,
    req: PoolScaleRequest,
) -> Result<PoolScaleResponse, MahavishnuError> {
    let current_size = registry
        .pool_manager
        .scale(&req.pool_id, req.target_workers)
        .await;
    Ok(PoolScaleResponse { current_size })
}

#[derive(Debug, Deserialize)]
pub struct PoolCloseRequest {
    pub pool_id: PoolId,
}

pub async fn pool_close(registry: &Registry, req: PoolCloseRequest) -> Result<(), MahavishnuError> {
    registry.pool_manager.close(&req.pool_id).await;
    Ok(())
}

/// Drains every pool currently in the registry; used by graceful
/// shutdown.
pub async fn pool_close_all(registry: &Registry) -> Result<(), MahavishnuError> {
    for pool_id in registry.pool_manager.pool_ids() {
        registry.pool_manager.close(&pool_id).await;
    }
    Ok(())
}

pub async fn pool_list(registry: &Registry) -> Result<Vec<PoolSnapshot>, MahavishnuError> {
    Ok(registry.pool_catalog())
}

#[derive(Debug, Deserialize)]
pub struct PoolHealthRequest {
    pub pool_id: PoolId,
}

pub async fn pool_health(
    registry: &Registry,
    req: PoolHealthRequest,
) -> Result<PoolHealth, MahavishnuError> {
    Ok(registry.pool_manager.health(&req.pool_id))
}

#[derive(Debug, Deserialize)]
pub struct PoolMemorySearchRequest {
    pub query: String,
    pub k: usize,
    /// Restricts the fan-out to these pools; empty means every pool.
    #[serde(default)]
    pub pool_filter: Vec<PoolId>,
}

#[derive(Debug, Serialize)]
pub struct RankedCandidateResponse {
    pub pool_id: PoolId,
    pub score: f64,
    pub artifact_id: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct AggregateSearchResponse {
    pub candidates: Vec<RankedCandidateResponse>,
    pub failed_pools: Vec<PoolId>,
}

pub async fn pool_memory_search(
    registry: &Registry,
    req: PoolMemorySearchRequest,
) -> Result<AggregateSearchResponse, MahavishnuError> {
    let filter = if req.pool_filter.is_empty() {
        None
    } else {
        Some(req.pool_filter)
    };
    let response = registry
        .aggregator
        .search(&req.query, req.k, filter.as_deref())
        .await;
    Ok(AggregateSearchResponse {
        candidates: response
            .candidates
            .into_iter()
            .map(|r| RankedCandidateResponse {
                pool_id: r.pool_id,
                score: r.candidate.score,
                artifact_id: r.candidate.artifact_id,
                metadata: r.candidate.metadata,
            })
            .collect(),
        failed_pools: response.failed_pools,
    })
}

pub fn is_healthy(health: &PoolHealth) -> bool {
    health.status == HealthStatus::Healthy
}
