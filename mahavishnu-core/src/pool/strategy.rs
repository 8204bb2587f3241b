//! Intra-pool worker selection. Tie-breaks are spelled out in the doc
//! comments below.

use crate::model::{IntraPoolStrategy, WorkerMeta, WorkerState};
use mahavishnu_common::ids::WorkerId;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks an idle worker from `workers` according to `strategy`. `workers`
/// is a snapshot taken under the pool's single-writer lock; `cursor` is the
/// pool's persistent round-robin position.
pub fn select_worker(
    strategy: IntraPoolStrategy,
    workers: &[WorkerMeta],
    cursor: &AtomicUsize,
    affinity_key: Option<&str>,
) -> Option<WorkerId> {
    if workers.is_empty() {
        return None;
    }
    match strategy {
        IntraPoolStrategy::RoundRobin => round_robin(workers, cursor),
        IntraPoolStrategy::LeastLoaded => least_loaded(workers),
        IntraPoolStrategy::Random => random(workers),
        IntraPoolStrategy::Affinity => affinity(workers, cursor, affinity_key),
    }
}

/// Maintains a cursor over `workers`; skips non-idle workers; wraps on
/// overflow.
fn round_robin(workers: &[WorkerMeta], cursor: &AtomicUsize) -> Option<WorkerId> {
    let len = workers.len();
    for step in 0..len {
        let idx = (cursor.fetch_add(1, Ordering::SeqCst) + step) % len;
        if workers[idx].is_idle() {
            return Some(workers[idx].worker_id.clone());
        }
    }
    None
}

/// Picks the idle worker with the oldest `last_task_end`; ties broken by
/// lowest `worker_id` (lexicographic on the id's string form).
fn least_loaded(workers: &[WorkerMeta]) -> Option<WorkerId> {
    workers
        .iter()
        .filter(|w| w.is_idle())
        .min_by(|a, b| {
            let a_key = a.last_task_end;
            let b_key = b.last_task_end;
            a_key
                .cmp(&b_key)
                .then_with(|| a.worker_id.to_string().cmp(&b.worker_id.to_string()))
        })
        .map(|w| w.worker_id.clone())
}

fn random(workers: &[WorkerMeta]) -> Option<WorkerId> {
    let idle: Vec<&WorkerMeta> = workers.iter().filter(|w| w.is_idle()).collect();
    if idle.is_empty() {
        return None;
    }
    let pick = fastrand::usize(0..idle.len());
    Some(idle[pick].worker_id.clone())
}

/// Hashes `affinity_key` into `[0, workers.len())`; if that worker is not
/// idle, falls back to least-loaded.
fn affinity(
    workers: &[WorkerMeta],
    cursor: &AtomicUsize,
    affinity_key: Option<&str>,
) -> Option<WorkerId> {
    let Some(key) = affinity_key else {
        return round_robin(workers, cursor);
    };
    let hash = fnv1a(key.as_bytes());
    let idx = (hash as usize) % workers.len();
    if workers[idx].state == WorkerState::Idle {
        Some(workers[idx].worker_id.clone())
    } else {
        least_loaded(workers)
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
    use mahavishnu_common::clock::SystemClock;
    use mahavishnu_common::ids::WorkerId;
    use std::time::Instant;
    use test_r::test;

    fn worker(state: WorkerState) -> WorkerMeta {
        let _ = SystemClock;
        WorkerMeta {
            worker_id: WorkerId::new(),
            kind: crate::model::WorkerKind::SubprocessAi,
            state,
            spawn_time: Instant::now(),
            current_task_id: None,
            last_task_end: None,
        }
    }

    #[test]
    fn round_robin_skips_busy_workers() {
        let workers = vec![
            worker(WorkerState::Running),
            worker(WorkerState::Idle),
            worker(WorkerState::Idle),
        ];
        let cursor = AtomicUsize::new(0);
        let picked = select_worker(IntraPoolStrategy::RoundRobin, &workers, &cursor, None);
        assert_eq!(picked, Some(workers[1].worker_id.clone()));
    }

    #[test]
    fn least_loaded_picks_oldest_idle() {
        let mut older = worker(WorkerState::Idle);
        older.last_task_end = Some(Instant::now() - std::time::Duration::from_secs(10));
        let newer = worker(WorkerState::Idle);
        let workers = vec![newer.clone(), older.clone()];
        let cursor = AtomicUsize::new(0);
        let picked = select_worker(IntraPoolStrategy::LeastLoaded, &workers, &cursor, None);
        assert_eq!(picked, Some(older.worker_id));
    }

    #[test]
    fn affinity_falls_back_when_target_busy() {
        let workers = vec![worker(WorkerState::Running), worker(WorkerState::Idle)];
        let cursor = AtomicUsize::new(0);
        // Regardless of which index the hash lands on, a busy target must
        // fall back to an idle worker rather than returning None.
        let picked = select_worker(IntraPoolStrategy::Affinity, &workers, &cursor, Some("k"));
        assert!(picked.is_some());
    }
}
