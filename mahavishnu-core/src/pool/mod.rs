//! Pool Manager.

pub mod memory;
pub mod strategy;

use crate::error::{Overloaded, PoolExecuteError, SpawnError};
use crate::model::{
    HealthStatus, IntraPoolStrategy, PoolHealth, PoolKind, PoolSnapshot, Priority, Task,
    TaskResult, WorkerKind, WorkerMeta, WorkerState,
};
use crate::worker::launcher::LauncherMetadata;
use crate::worker::WorkerManager;
use mahavishnu_common::clock::Clock;
use mahavishnu_common::ids::{PoolId, WorkerId};
use memory::{InMemoryMemoryHandle, MemoryHandle, SearchCandidate};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Number of priority tiers a freed worker is handed out in order of:
/// `Urgent`, `High`, `Normal`, `Low`.
const PRIORITY_TIERS: usize = 4;

fn priority_tier(priority: Priority) -> usize {
    match priority {
        Priority::Urgent => 0,
        Priority::High => 1,
        Priority::Normal => 2,
        Priority::Low => 3,
    }
}

type WaiterTiers = [VecDeque<oneshot::Sender<WorkerId>>; PRIORITY_TIERS];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub pool_kind: PoolKind,
    pub worker_kind: WorkerKind,
    pub min_workers: usize,
    pub max_workers: usize,
    pub strategy: IntraPoolStrategy,
    pub launcher_metadata: LauncherMetadata,
    pub queue_depth: Option<usize>,
    #[serde(with = "humantime_serde")]
    pub spawn_budget: Duration,
    #[serde(with = "humantime_serde")]
    pub fault_window: Duration,
    pub degraded_fault_ratio: f64,
}

impl PoolConfig {
    fn queue_depth(&self) -> usize {
        self.queue_depth.unwrap_or(self.max_workers * 2)
    }
}

struct Pool {
    pool_id: PoolId,
    config: PoolConfig,
    worker_ids: Mutex<Vec<mahavishnu_common::ids::WorkerId>>,
    cursor: AtomicUsize,
    memory: Arc<dyn MemoryHandle>,
    queued_count: AtomicUsize,
    /// Tickets for tasks parked on admission, one `VecDeque` per priority
    /// tier (`Urgent` first). A freed worker is handed to the oldest
    /// waiter in the highest non-empty tier, never broadcast.
    waiters: Mutex<WaiterTiers>,
    closing: AtomicBool,
    fault_timestamps: Mutex<Vec<Instant>>,
}

impl Pool {
    fn has_waiters(&self) -> bool {
        self.waiters.lock().unwrap().iter().any(|tier| !tier.is_empty())
    }
}

pub struct PoolManager {
    worker_manager: Arc<WorkerManager>,
    clock: Arc<dyn Clock>,
    pools: dashmap::DashMap<PoolId, Arc<Pool>>,
}

impl PoolManager {
    pub fn new(worker_manager: Arc<WorkerManager>, clock: Arc<dyn Clock>) -> Self {
        Self {
            worker_manager,
            clock,
            pools: dashmap::DashMap::new(),
        }
    }

    pub async fn create_pool(&self, config: PoolConfig) -> Result<PoolId, SpawnError> {
        let pool_id = PoolId::new();
        let pool = Arc::new(Pool {
            pool_id,
            config: config.clone(),
            worker_ids: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            memory: Arc::new(InMemoryMemoryHandle::new()),
            queued_count: AtomicUsize::new(0),
            waiters: Mutex::new(Default::default()),
            closing: AtomicBool::new(false),
            fault_timestamps: Mutex::new(Vec::new()),
        });
        self.pools.insert(pool_id, pool.clone());
        self.spawn_n(&pool, config.min_workers).await?;
        info!(pool_id = %pool_id, min = config.min_workers, max = config.max_workers, "pool created");
        Ok(pool_id)
    }

    async fn spawn_n(&self, pool: &Arc<Pool>, n: usize) -> Result<usize, SpawnError> {
        let budget = pool.config.spawn_budget;
        let worker_kind = pool.config.worker_kind;
        let metadata = pool.config.launcher_metadata.clone();
        let memory = pool.memory.clone();
        let futures = (0..n).map(|_| {
            let wm = self.worker_manager.clone();
            let metadata = metadata.clone();
            let memory = memory.clone();
            async move { tokio::time::timeout(budget, wm.spawn(worker_kind, metadata, memory)).await }
        });
        let results = futures::future::join_all(futures).await;
        let mut spawned = 0usize;
        let mut last_err = None;
        for result in results {
            match result {
                Ok(Ok(worker_id)) => {
                    pool.worker_ids.lock().unwrap().push(worker_id);
                    spawned += 1;
                }
                Ok(Err(e)) => last_err = Some(e),
                Err(_) => {
                    last_err = Some(SpawnError::Transient(
                        "spawn budget exceeded".to_string(),
                    ))
                }
            }
        }
        if spawned == 0 {
            if let Some(e) = last_err {
                return Err(e);
            }
        }
        Ok(spawned)
    }

    /// Returns the clamped, actually-achieved size.
    pub async fn scale(&self, pool_id: &PoolId, target: usize) -> usize {
        let Some(pool) = self.pools.get(pool_id).map(|p| p.clone()) else {
            return 0;
        };
        let target = target.clamp(pool.config.min_workers, pool.config.max_workers);
        let current = pool.worker_ids.lock().unwrap().len();

        if target > current {
            let spawned = self.spawn_n(&pool, target - current).await.unwrap_or(0);
            current + spawned
        } else if target < current {
            let victims = self.select_scale_down_victims(&pool, current - target);
            for victim in &victims {
                self.worker_manager.close(victim).await;
            }
            let mut ids = pool.worker_ids.lock().unwrap();
            ids.retain(|id| !victims.contains(id));
            ids.len()
        } else {
            current
        }
    }

    fn select_scale_down_victims(
        &self,
        pool: &Arc<Pool>,
        count: usize,
    ) -> Vec<mahavishnu_common::ids::WorkerId> {
        let ids = pool.worker_ids.lock().unwrap().clone();
        let mut metas: Vec<WorkerMeta> = ids
            .iter()
            .filter_map(|id| self.worker_manager.worker_meta(id))
            .collect();
        metas.sort_by(|a, b| {
            let a_idle = !a.is_idle();
            let b_idle = !b.is_idle();
            a_idle
                .cmp(&b_idle)
                .then_with(|| a.last_task_end.cmp(&b.last_task_end))
        });
        metas
            .into_iter()
            .take(count)
            .map(|m| m.worker_id)
            .collect()
    }

    /// Tries an idle worker via the pool's intra-pool strategy; otherwise
    /// enqueues a ticket in the task's priority tier, in FIFO order within
    /// that tier. A worker freed up while waiters are queued is handed
    /// directly to the oldest ticket in the highest non-empty tier, so a
    /// fresh arrival can never race ahead of an already-queued task.
    pub async fn execute(&self, pool_id: &PoolId, task: Task) -> Result<TaskResult, PoolExecuteError> {
        let Some(pool) = self.pools.get(pool_id).map(|p| p.clone()) else {
            return Err(PoolExecuteError::Closed);
        };

        loop {
            if pool.closing.load(Ordering::SeqCst) {
                return Ok(TaskResult {
                    task_id: task.task_id,
                    worker_id: mahavishnu_common::ids::WorkerId::new(),
                    status: crate::model::ResultStatus::Cancelled,
                    artifact: Vec::new(),
                    stderr_tail: Vec::new(),
                    duration: Duration::ZERO,
                    stream_frames_consumed: 0,
                });
            }

            let picked = if pool.has_waiters() {
                None
            } else {
                let ids = pool.worker_ids.lock().unwrap().clone();
                let metas: Vec<WorkerMeta> = ids
                    .iter()
                    .filter_map(|id| self.worker_manager.worker_meta(id))
                    .collect();
                strategy::select_worker(
                    pool.config.strategy,
                    &metas,
                    &pool.cursor,
                    task.affinity_key.as_deref(),
                )
            };

            if let Some(worker_id) = picked {
                match self.worker_manager.execute(&worker_id, task.clone()).await {
                    Ok(result) => {
                        if result.status == crate::model::ResultStatus::Failed {
                            pool.fault_timestamps.lock().unwrap().push(self.clock.now());
                        }
                        self.release_worker(&pool, worker_id);
                        return Ok(result);
                    }
                    Err(_busy) => continue, // lost the race, retry selection
                }
            }

            let reserved = pool.queued_count.fetch_add(1, Ordering::SeqCst);
            if reserved >= pool.config.queue_depth() {
                pool.queued_count.fetch_sub(1, Ordering::SeqCst);
                return Err(PoolExecuteError::Overloaded(Overloaded {
                    pool_id: *pool_id,
                    retry_after: Duration::from_millis(250),
                }));
            }

            let (ticket_tx, ticket_rx) = oneshot::channel();
            pool.waiters.lock().unwrap()[priority_tier(task.priority)].push_back(ticket_tx);

            let now = self.clock.now();
            let wait = task.time_to_deadline(now);
            enum Admission {
                Granted(mahavishnu_common::ids::WorkerId),
                Closed,
                TimedOut,
            }
            let admission = tokio::select! {
                received = ticket_rx => match received {
                    Ok(worker_id) => Admission::Granted(worker_id),
                    Err(_) => Admission::Closed, // ticket dropped: pool.close() drained the tier
                },
                _ = tokio::time::sleep(wait) => Admission::TimedOut,
            };
            pool.queued_count.fetch_sub(1, Ordering::SeqCst);

            match admission {
                Admission::Granted(worker_id) => {
                    match self.worker_manager.execute(&worker_id, task.clone()).await {
                        Ok(result) => {
                            if result.status == crate::model::ResultStatus::Failed {
                                pool.fault_timestamps.lock().unwrap().push(self.clock.now());
                            }
                            self.release_worker(&pool, worker_id);
                            return Ok(result);
                        }
                        Err(_busy) => continue, // worker went away between handoff and execute, retry
                    }
                }
                Admission::Closed => continue, // loop head re-checks `pool.closing` and returns Cancelled
                Admission::TimedOut => {
                    return Ok(TaskResult {
                        task_id: task.task_id,
                        worker_id: mahavishnu_common::ids::WorkerId::new(),
                        status: crate::model::ResultStatus::TimedOut,
                        artifact: Vec::new(),
                        stderr_tail: Vec::new(),
                        duration: Duration::ZERO,
                        stream_frames_consumed: 0,
                    });
                }
            }
        }
    }

    /// Hands a just-freed worker straight to the oldest waiter in the
    /// highest non-empty priority tier. A send failing (receiver already
    /// dropped, e.g. the waiter timed out) just moves on to the next
    /// ticket in that tier; the worker stays genuinely idle only once
    /// every tier is empty.
    fn release_worker(&self, pool: &Arc<Pool>, worker_id: mahavishnu_common::ids::WorkerId) {
        let mut waiters = pool.waiters.lock().unwrap();
        for tier in waiters.iter_mut() {
            while let Some(ticket) = tier.pop_front() {
                match ticket.send(worker_id.clone()) {
                    Ok(()) => return,
                    Err(_worker_id) => continue,
                }
            }
        }
    }

    /// Reports current aggregate health for the pool.
    pub fn health(&self, pool_id: &PoolId) -> PoolHealth {
        let Some(pool) = self.pools.get(pool_id).map(|p| p.clone()) else {
            return PoolHealth {
                status: HealthStatus::Unhealthy,
            };
        };
        let ids = pool.worker_ids.lock().unwrap().clone();
        let metas: Vec<WorkerMeta> = ids
            .iter()
            .filter_map(|id| self.worker_manager.worker_meta(id))
            .collect();

        if metas.is_empty() || metas.iter().all(|m| m.state == WorkerState::Faulted) {
            return PoolHealth {
                status: HealthStatus::Unhealthy,
            };
        }

        let now = self.clock.now();
        let mut faults = pool.fault_timestamps.lock().unwrap();
        faults.retain(|&t| now.duration_since(t) <= pool.config.fault_window);
        let ratio = faults.len() as f64 / metas.len().max(1) as f64;
        if ratio > pool.config.degraded_fault_ratio {
            return PoolHealth {
                status: HealthStatus::Degraded,
            };
        }

        let has_active = metas
            .iter()
            .any(|m| matches!(m.state, WorkerState::Idle | WorkerState::Running));
        if metas.len() >= pool.config.min_workers && has_active {
            PoolHealth {
                status: HealthStatus::Healthy,
            }
        } else {
            PoolHealth {
                status: HealthStatus::Degraded,
            }
        }
    }

    pub fn snapshot(&self, pool_id: &PoolId) -> Option<PoolSnapshot> {
        let pool = self.pools.get(pool_id)?.clone();
        let ids = pool.worker_ids.lock().unwrap().clone();
        let metas: Vec<WorkerMeta> = ids
            .iter()
            .filter_map(|id| self.worker_manager.worker_meta(id))
            .collect();
        let inflight = metas
            .iter()
            .filter(|m| m.state == WorkerState::Running)
            .count();
        Some(PoolSnapshot {
            pool_id: *pool_id,
            pool_kind: pool.config.pool_kind,
            min_workers: pool.config.min_workers,
            max_workers: pool.config.max_workers,
            current_size: metas.len(),
            inflight,
            queued: pool.queued_count.load(Ordering::SeqCst),
            health: self.health(pool_id).status,
        })
    }

    /// Draining: stop admitting, let running tasks complete, then close
    /// all workers.
    pub async fn close(&self, pool_id: &PoolId) {
        let Some(pool) = self.pools.get(pool_id).map(|p| p.clone()) else {
            return;
        };
        pool.closing.store(true, Ordering::SeqCst);
        for tier in pool.waiters.lock().unwrap().iter_mut() {
            tier.clear(); // dropping each sender resolves its waiter's receiver to `Err`
        }
        let ids = pool.worker_ids.lock().unwrap().clone();
        for id in ids {
            self.worker_manager.close(&id).await;
        }
        warn!(pool_id = %pool_id, "pool closed");
    }

    pub async fn memory_put(&self, pool_id: &PoolId, key: String, value: Vec<u8>) {
        if let Some(pool) = self.pools.get(pool_id) {
            pool.memory.put(key, value).await;
        }
    }

    pub async fn memory_search(
        &self,
        pool_id: &PoolId,
        query: &str,
        k: usize,
    ) -> Option<Vec<SearchCandidate>> {
        let pool = self.pools.get(pool_id)?.clone();
        Some(pool.memory.search(query, k).await)
    }

    pub fn memory_handle(&self, pool_id: &PoolId) -> Option<Arc<dyn MemoryHandle>> {
        self.pools.get(pool_id).map(|p| p.memory.clone())
    }

    pub fn pool_ids(&self) -> Vec<PoolId> {
        self.pools.iter().map(|e| *e.key()).collect()
    }
}
