//! Process-wide arena: a single registry owns the pool manager (which owns
//! workers by id) and the other first-class services, constructed once at
//! startup and handed to callers by reference — no implicit globals, no
//! singleton access.

use crate::aggregator::Aggregator;
use crate::breaker::{BreakerConfig, CircuitBreakerRegistry};
use crate::bus::store::BusStore;
use crate::bus::MessageBus;
use crate::pool::PoolManager;
use crate::ratelimit::{RateLimitConfig, RateLimiter};
use crate::router::Router;
use crate::worker::launcher::{ContainerRuntime, ProcessLauncher, RemoteOrchestratorClient};
use crate::worker::WorkerManager;
use mahavishnu_common::clock::Clock;
use mahavishnu_common::ids::{PoolId, TaskId};
use mahavishnu_common::metrics::MetricsSink;
use std::sync::Arc;

/// Owns every component by `Arc`, wired once at process startup. Tasks
/// reference workers/pools by id during dispatch; this struct is the only
/// place that holds the id -> component mapping.
pub struct Registry {
    pub worker_manager: Arc<WorkerManager>,
    pub pool_manager: Arc<PoolManager>,
    pub router: Router,
    pub bus: Arc<MessageBus>,
    pub aggregator: Arc<Aggregator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub breaker: Arc<CircuitBreakerRegistry>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl Registry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
        container_runtime: Arc<dyn ContainerRuntime>,
        remote_client: Arc<dyn RemoteOrchestratorClient>,
        process_launcher: Arc<dyn ProcessLauncher>,
        bus_store: Arc<dyn BusStore>,
        router_strategy: crate::model::InterPoolStrategy,
        rate_limit_config: RateLimitConfig,
        breaker_config: BreakerConfig,
    ) -> Self {
        let worker_manager = Arc::new(WorkerManager::new(
            clock.clone(),
            container_runtime,
            remote_client,
            process_launcher,
        ));
        let pool_manager = Arc::new(PoolManager::new(worker_manager.clone(), clock.clone()));
        Self {
            worker_manager,
            pool_manager: pool_manager.clone(),
            router: Router::new(router_strategy),
            bus: Arc::new(MessageBus::new(bus_store)),
            aggregator: Arc::new(Aggregator::new(pool_manager)),
            rate_limiter: Arc::new(RateLimiter::new(clock.clone(), rate_limit_config)),
            breaker: Arc::new(CircuitBreakerRegistry::new(clock.clone(), breaker_config)),
            clock,
            metrics,
        }
    }

    /// Builds the pool catalog snapshot the router requires; this is the
    /// caller's I/O, not the router's.
    pub fn pool_catalog(&self) -> Vec<crate::model::PoolSnapshot> {
        self.pool_manager
            .pool_ids()
            .iter()
            .filter_map(|id| self.pool_manager.snapshot(id))
            .collect()
    }

    pub fn route_and_execute(
        &self,
        task: crate::model::Task,
    ) -> RouteAndExecute<'_> {
        RouteAndExecute { registry: self, task }
    }
}

/// Builder-style handle so `pool.route_execute` callers can inspect the
/// chosen pool before awaiting dispatch: route -> rate limit -> execute.
pub struct RouteAndExecute<'a> {
    registry: &'a Registry,
    task: crate::model::Task,
}

impl<'a> RouteAndExecute<'a> {
    pub fn route(&self) -> Result<PoolId, crate::error::RouteError> {
        let catalog = self.registry.pool_catalog();
        self.registry.router.route(&self.task, &catalog)
    }

    pub async fn dispatch(self, pool_id: PoolId) -> Result<crate::model::TaskResult, crate::error::PoolExecuteError> {
        self.registry.pool_manager.execute(&pool_id, self.task).await
    }
}

/// Tasks never outlive their dispatch in this kernel; `TaskId` is retained
/// only for correlating a `Result` back to its originating request (e.g.
/// the tool surface's pending-call table), not for registry lookups.
pub fn correlate(task_id: &TaskId) -> String {
    task_id.to_string()
}
