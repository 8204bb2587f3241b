//! Aggregator. Fans out `memory_search` across pools with bounded
//! concurrency, merges by score, tolerates partial failure.

use crate::pool::memory::SearchCandidate;
use crate::pool::PoolManager;
use mahavishnu_common::ids::PoolId;
use std::collections::HashSet;
use std::time::Duration;
use tracing::warn;

const DEFAULT_PER_POOL_DEADLINE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub pool_id: PoolId,
    pub candidate: SearchCandidate,
}

#[derive(Debug, Clone, Default)]
pub struct AggregateSearchResponse {
    pub candidates: Vec<RankedCandidate>,
    /// Pools that errored or exceeded their per-pool deadline; the overall
    /// call still succeeds as long as at least one pool answered.
    pub failed_pools: Vec<PoolId>,
}

pub struct Aggregator {
    pool_manager: std::sync::Arc<PoolManager>,
    /// Configured pool priority used as a merge tie-break; pools absent
    /// from this map rank lowest.
    pool_priority: dashmap::DashMap<PoolId, u32>,
}

impl Aggregator {
    pub fn new(pool_manager: std::sync::Arc<PoolManager>) -> Self {
        Self {
            pool_manager,
            pool_priority: dashmap::DashMap::new(),
        }
    }

    pub fn set_pool_priority(&self, pool_id: PoolId, priority: u32) {
        self.pool_priority.insert(pool_id, priority);
    }

    /// Fans the query out to every known pool, merging results by score.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        pool_filter: Option<&[PoolId]>,
    ) -> AggregateSearchResponse {
        let pool_ids: Vec<PoolId> = match pool_filter {
            Some(ids) => ids.to_vec(),
            None => self.pool_manager.pool_ids(),
        };

        let fanout = pool_ids.into_iter().map(|pool_id| {
            let pool_manager = self.pool_manager.clone();
            let query = query.to_string();
            async move {
                let result = tokio::time::timeout(
                    DEFAULT_PER_POOL_DEADLINE,
                    pool_manager.memory_search(&pool_id, &query, k),
                )
                .await;
                match result {
                    Ok(Some(candidates)) => Ok((pool_id, candidates)),
                    Ok(None) => {
                        warn!(pool_id = %pool_id, "pool has no memory handle");
                        Err(pool_id)
                    }
                    Err(_) => {
                        warn!(pool_id = %pool_id, "memory search exceeded per-pool deadline");
                        Err(pool_id)
                    }
                }
            }
        });

        let results = futures::future::join_all(fanout).await;

        let mut merged: Vec<RankedCandidate> = Vec::new();
        let mut failed = Vec::new();
        let mut seen: HashSet<(PoolId, String)> = HashSet::new();

        for result in results {
            match result {
                Ok((pool_id, candidates)) => {
                    for candidate in candidates {
                        let dedupe_key = (pool_id, candidate.artifact_id.clone());
                        if seen.insert(dedupe_key) {
                            merged.push(RankedCandidate { pool_id, candidate });
                        }
                    }
                }
                Err(pool_id) => failed.push(pool_id),
            }
        }

        merged.sort_by(|a, b| {
            b.candidate
                .score
                .partial_cmp(&a.candidate.score)
                .unwrap()
                .then_with(|| {
                    let pa = self.pool_priority.get(&a.pool_id).map(|p| *p).unwrap_or(0);
                    let pb = self.pool_priority.get(&b.pool_id).map(|p| *p).unwrap_or(0);
                    pb.cmp(&pa)
                })
                .then_with(|| a.pool_id.to_string().cmp(&b.pool_id.to_string()))
        });
        merged.truncate(k);

        AggregateSearchResponse {
            candidates: merged,
            failed_pools: failed,
        }
    }
}
