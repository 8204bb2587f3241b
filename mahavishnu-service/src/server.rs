use mahavishnu_common::clock::SystemClock;
use mahavishnu_common::metrics::prometheus_sink::PrometheusMetricsSink;
use mahavishnu_common::tracing_init::init_tracing_with_default_env_filter;
use mahavishnu_common::SafeDisplay;
use mahavishnu_core::bus::store::MemoryBusStore;
use mahavishnu_core::registry::Registry;
use mahavishnu_core::worker::launcher::NullProcessLauncher;
use mahavishnu_service::adapters::{UnconfiguredContainerRuntime, UnconfiguredRemoteOrchestratorClient};
use mahavishnu_service::build_tool_registry;
use mahavishnu_service::config::{make_config_loader, MahavishnuConfig};
use std::sync::Arc;
use tracing::info;

fn main() -> Result<(), std::io::Error> {
    let Some(config) = make_config_loader().load_or_dump_config() else {
        return Ok(());
    };

    init_tracing_with_default_env_filter(&config.tracing);
    info!(config = %config.to_safe_string(), "loaded configuration");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config))
}

async fn async_main(config: MahavishnuConfig) -> Result<(), std::io::Error> {
    let prometheus_registry = prometheus::Registry::new();
    let metrics = Arc::new(PrometheusMetricsSink::new(prometheus_registry));

    let registry = Arc::new(Registry::new(
        Arc::new(SystemClock),
        metrics,
        Arc::new(UnconfiguredContainerRuntime),
        Arc::new(UnconfiguredRemoteOrchestratorClient),
        Arc::new(NullProcessLauncher),
        Arc::new(MemoryBusStore::new()),
        config.router.strategy,
        config.rate_limits.get("default").cloned().unwrap_or_default(),
        config
            .circuit_breakers
            .get("default")
            .cloned()
            .unwrap_or_default(),
    ));

    for (name, secret) in &config.bus.repo_secrets {
        registry.bus.register_repo(name.clone(), secret.clone().into_bytes());
    }

    for (name, pool_config) in config.pools.clone() {
        match registry.pool_manager.create_pool(pool_config).await {
            Ok(pool_id) => info!(pool = name, pool_id = %pool_id, "seed pool created"),
            Err(e) => {
                tracing::error!(pool = name, error = %e.to_safe_string(), "failed to create seed pool")
            }
        }
    }

    // The actual tool-protocol transport (HTTP/RPC listener) registers
    // against `_tools` via `ToolTransport` at the point a concrete
    // transport is wired in. This binary owns the registry lifecycle and
    // graceful shutdown.
    let _tools = build_tool_registry(registry.clone());
    info!(http_port = config.http_port, "mahavishnu-service ready");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    info!("shutdown signal received, draining pools");
    for pool_id in registry.pool_manager.pool_ids() {
        registry.pool_manager.close(&pool_id).await;
    }
    Ok(())
}
