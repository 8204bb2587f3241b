//! Router. Synchronous and non-suspending by design: `route` reads only
//! pool-maintained counters, never performs I/O.

use crate::error::{NoPoolAvailable, RouteError};
use crate::model::{HealthStatus, InterPoolStrategy, PoolKind, PoolSnapshot, Task};
use mahavishnu_common::ids::PoolId;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct Router {
    strategy: InterPoolStrategy,
    cursor: AtomicUsize,
}

impl Router {
    pub fn new(strategy: InterPoolStrategy) -> Self {
        Self {
            strategy,
            cursor: AtomicUsize::new(0),
        }
    }

    /// `catalog` is a caller-supplied, already-fetched snapshot of every
    /// candidate pool — fetching it is the caller's I/O, not the router's.
    pub fn route(&self, task: &Task, catalog: &[PoolSnapshot]) -> Result<PoolId, RouteError> {
        if let Some(requested_kind) = task.requested_pool_kind {
            return self
                .route_pinned(requested_kind, catalog)
                .ok_or_else(|| NoPoolAvailable.into());
        }
        self.route_by_strategy(task, catalog)
            .ok_or_else(|| NoPoolAvailable.into())
    }

    fn route_pinned(&self, kind: PoolKind, catalog: &[PoolSnapshot]) -> Option<PoolId> {
        catalog
            .iter()
            .find(|p| p.pool_kind == kind && p.health != HealthStatus::Unhealthy)
            .map(|p| p.pool_id)
    }

    fn route_by_strategy(&self, task: &Task, catalog: &[PoolSnapshot]) -> Option<PoolId> {
        match self.strategy {
            InterPoolStrategy::RoundRobin => self.round_robin(catalog),
            InterPoolStrategy::LeastLoaded => Self::least_loaded(catalog),
            InterPoolStrategy::Random => Self::random(catalog),
            InterPoolStrategy::Affinity => self.affinity(task, catalog),
        }
    }

    fn healthy(catalog: &[PoolSnapshot]) -> Vec<&PoolSnapshot> {
        catalog
            .iter()
            .filter(|p| p.health != HealthStatus::Unhealthy)
            .collect()
    }

    fn round_robin(&self, catalog: &[PoolSnapshot]) -> Option<PoolId> {
        let healthy = Self::healthy(catalog);
        if healthy.is_empty() {
            return None;
        }
        let len = healthy.len();
        for step in 0..len {
            let idx = (self.cursor.fetch_add(1, Ordering::SeqCst) + step) % len;
            return Some(healthy[idx].pool_id);
        }
        None
    }

    /// Minimizes `(inflight + queued) / max_workers`; ties broken by lowest
    /// `pool_id` lexicographically (string form, since `PoolId` has no
    /// inherent ordering meaningful to callers).
    fn least_loaded(catalog: &[PoolSnapshot]) -> Option<PoolId> {
        Self::healthy(catalog)
            .into_iter()
            .min_by(|a, b| {
                let load_a = (a.inflight + a.queued) as f64 / a.max_workers.max(1) as f64;
                let load_b = (b.inflight + b.queued) as f64 / b.max_workers.max(1) as f64;
                load_a
                    .partial_cmp(&load_b)
                    .unwrap()
                    .then_with(|| a.pool_id.to_string().cmp(&b.pool_id.to_string()))
            })
            .map(|p| p.pool_id)
    }

    fn random(catalog: &[PoolSnapshot]) -> Option<PoolId> {
        let healthy = Self::healthy(catalog);
        if healthy.is_empty() {
            return None;
        }
        let idx = fastrand::usize(0..healthy.len());
        Some(healthy[idx].pool_id)
    }

    /// Hashes `affinity_key` across pools; falls back to least-loaded if the
    /// hashed target is unhealthy.
    fn affinity(&self, task: &Task, catalog: &[PoolSnapshot]) -> Option<PoolId> {
        let Some(key) = task.affinity_key.as_deref() else {
            return self.round_robin(catalog);
        };
        if catalog.is_empty() {
            return None;
        }
        let hash = fnv1a(key.as_bytes());
        let idx = (hash as usize) % catalog.len();
        let target = &catalog[idx];
        if target.health != HealthStatus::Unhealthy {
            Some(target.pool_id)
        } else {
            Self::least_loaded(catalog)
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskKind;
    use mahavishnu_common::ids::TaskId;
    use std::time::Instant;
    use test_r::test;

    fn snapshot(pool_kind: PoolKind, health: HealthStatus) -> PoolSnapshot {
        PoolSnapshot {
            pool_id: PoolId::new(),
            pool_kind,
            min_workers: 1,
            max_workers: 2,
            current_size: 1,
            inflight: 0,
            queued: 0,
            health,
        }
    }

    fn task(requested_pool_kind: Option<PoolKind>) -> Task {
        Task {
            task_id: TaskId::new(),
            kind: TaskKind::Shell,
            payload: crate::model::TaskPayload::default(),
            deadline: Instant::now() + std::time::Duration::from_secs(5),
            priority: crate::model::Priority::Normal,
            requested_pool_kind,
            affinity_key: None,
        }
    }

    #[test]
    fn pinning_fails_closed_when_requested_kind_unhealthy() {
        let router = Router::new(InterPoolStrategy::RoundRobin);
        let catalog = vec![
            snapshot(PoolKind::Local, HealthStatus::Healthy),
            snapshot(PoolKind::Container, HealthStatus::Unhealthy),
        ];
        let result = router.route(&task(Some(PoolKind::Container)), &catalog);
        assert!(result.is_err());
    }

    #[test]
    fn least_loaded_picks_lowest_relative_load() {
        let router = Router::new(InterPoolStrategy::LeastLoaded);
        let mut busy = snapshot(PoolKind::Local, HealthStatus::Healthy);
        busy.inflight = 2;
        let idle = snapshot(PoolKind::Local, HealthStatus::Healthy);
        let catalog = vec![busy.clone(), idle.clone()];
        let picked = router.route(&task(None), &catalog).unwrap();
        assert_eq!(picked, idle.pool_id);
    }

    #[test]
    fn no_healthy_pool_yields_no_pool_available() {
        let router = Router::new(InterPoolStrategy::RoundRobin);
        let catalog = vec![snapshot(PoolKind::Local, HealthStatus::Unhealthy)];
        assert!(router.route(&task(None), &catalog).is_err());
    }
}
