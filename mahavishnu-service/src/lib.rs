pub mod adapters;
pub mod config;
pub mod endpoints;
pub mod tool_surface;

#[cfg(test)]
test_r::enable!();

use mahavishnu_core::registry::Registry;
use tool_surface::{guarded, BoxedHandler, ResultEnvelope, ToolRegistry};

/// Registers every `pool.*` / `worker.*` / `msg.*` endpoint onto a
/// `ToolRegistry`, each wrapped by `guarded` so a handler panic surfaces
/// as a structured `MahavishnuError::Internal` instead of unwinding into
/// the (opaque) tool-protocol transport.
pub fn build_tool_registry(registry: std::sync::Arc<Registry>) -> ToolRegistry {
    let mut tools = ToolRegistry::new();

    macro_rules! register {
        ($name:literal, $endpoint:path) => {
            let registry = registry.clone();
            let handler: BoxedHandler = std::sync::Arc::new(move |params: serde_json::Value| {
                let registry = registry.clone();
                Box::pin(async move {
                    let outcome = guarded($name, move || async move {
                        let req = serde_json::from_value(params)
                            .map_err(|e| tool_surface::MahavishnuError::BadRequest(e.to_string()))?;
                        $endpoint(&registry, req).await
                    })
                    .await;
                    serde_json::to_value(outcome).unwrap_or_else(|_| {
                        serde_json::to_value(ResultEnvelope::<()>::err(
                            &tool_surface::MahavishnuError::Internal,
                        ))
                        .expect("envelope always serializes")
                    })
                })
            });
            tools.register($name, handler);
        };
    }

    macro_rules! register_no_args {
        ($name:literal, $endpoint:path) => {
            let registry = registry.clone();
            let handler: BoxedHandler = std::sync::Arc::new(move |_params: serde_json::Value| {
                let registry = registry.clone();
                Box::pin(async move {
                    let outcome = guarded($name, move || async move { $endpoint(&registry).await }).await;
                    serde_json::to_value(outcome).unwrap_or_else(|_| {
                        serde_json::to_value(ResultEnvelope::<()>::err(
                            &tool_surface::MahavishnuError::Internal,
                        ))
                        .expect("envelope always serializes")
                    })
                })
            });
            tools.register($name, handler);
        };
    }

    register!("pool.spawn", endpoints::pool::pool_spawn);
    register!("pool.execute", endpoints::pool::pool_execute);
    register!("pool.route_execute", endpoints::pool::pool_route_execute);
    register!("pool.scale", endpoints::pool::pool_scale);
    register!("pool.close", endpoints::pool::pool_close);
    register_no_args!("pool.close_all", endpoints::pool::pool_close_all);
    register_no_args!("pool.list", endpoints::pool::pool_list);
    register!("pool.health", endpoints::pool::pool_health);
    register!("pool.memory_search", endpoints::pool::pool_memory_search);

    register!("worker.spawn", endpoints::worker::worker_spawn);
    register!("worker.execute", endpoints::worker::worker_execute);
    register!(
        "worker.execute_batch",
        endpoints::worker::worker_execute_batch
    );
    register_no_args!("worker.list", endpoints::worker::worker_list);
    register!("worker.close", endpoints::worker::worker_close);
    register_no_args!("worker.close_all", endpoints::worker::worker_close_all);

    register!("msg.send", endpoints::msg::msg_send);
    register!("msg.list", endpoints::msg::msg_list);
    register!("msg.ack", endpoints::msg::msg_ack);
    register!("msg.forward", endpoints::msg::msg_forward);
    register!("msg.broadcast", endpoints::msg::msg_broadcast);

    tools
}

#[cfg(test)]
mod tests {
    use super::*;
    use mahavishnu_common::clock::SystemClock;
    use mahavishnu_common::metrics::noop_sink;
    use mahavishnu_core::bus::store::MemoryBusStore;
    use mahavishnu_core::breaker::BreakerConfig;
    use mahavishnu_core::model::InterPoolStrategy;
    use mahavishnu_core::ratelimit::RateLimitConfig;
    use std::sync::Arc;
    use test_r::test;

    fn test_registry() -> Arc<Registry> {
        Arc::new(Registry::new(
            Arc::new(SystemClock),
            noop_sink(),
            Arc::new(crate::adapters::UnconfiguredContainerRuntime),
            Arc::new(crate::adapters::UnconfiguredRemoteOrchestratorClient),
            Arc::new(mahavishnu_core::worker::launcher::NullProcessLauncher),
            Arc::new(MemoryBusStore::new()),
            InterPoolStrategy::LeastLoaded,
            RateLimitConfig::default(),
            BreakerConfig::default(),
        ))
    }

    #[tokio::test]
    async fn dispatch_to_unknown_endpoint_returns_bad_request() {
        let tools = build_tool_registry(test_registry());
        let response = tools.dispatch("nope.nope", serde_json::json!({})).await;
        assert_eq!(response["ok"], false);
        assert_eq!(response["error"]["kind"], "bad_request");
    }

    #[tokio::test]
    async fn pool_list_round_trips_through_the_registry() {
        let tools = build_tool_registry(test_registry());
        let response = tools.dispatch("pool.list", serde_json::json!({})).await;
        assert_eq!(response["ok"], true);
        assert_eq!(response["data"], serde_json::json!([]));
    }
}
