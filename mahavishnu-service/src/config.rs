//! Service-level configuration, layered the same way as the workspace's
//! other `*ServiceConfig` types: compiled-in defaults -> optional TOML
//! file -> `MAHAVISHNU_`-prefixed env vars.

use mahavishnu_common::config::{ConfigExample, DbConfig, HasConfigExamples};
use mahavishnu_common::tracing_init::TracingConfig;
use mahavishnu_common::SafeDisplay;
use mahavishnu_core::breaker::BreakerConfig;
use mahavishnu_core::model::InterPoolStrategy;
use mahavishnu_core::pool::PoolConfig;
use mahavishnu_core::ratelimit::RateLimitConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MahavishnuConfig {
    pub tracing: TracingConfig,
    pub environment: String,
    pub http_port: u16,
    pub bus: BusConfig,
    /// Seed pools created at startup, keyed by a human-readable name used
    /// only in config; the runtime identity is the generated `PoolId`.
    pub pools: HashMap<String, PoolConfig>,
    pub router: RouterConfig,
    pub rate_limits: HashMap<String, RateLimitConfig>,
    pub circuit_breakers: HashMap<String, BreakerConfig>,
    pub spawn_budget_seconds: u64,
}

impl Default for MahavishnuConfig {
    fn default() -> Self {
        Self {
            tracing: TracingConfig::local_dev("mahavishnu-service"),
            environment: "dev".to_string(),
            http_port: 8090,
            bus: BusConfig::default(),
            pools: HashMap::new(),
            router: RouterConfig::default(),
            rate_limits: HashMap::new(),
            circuit_breakers: HashMap::new(),
            spawn_budget_seconds: 30,
        }
    }
}

impl SafeDisplay for MahavishnuConfig {
    fn to_safe_string(&self) -> String {
        format!(
            "environment: {}\nhttp_port: {}\nbus: {}\npools: {}\nrouter.strategy: {:?}",
            self.environment,
            self.http_port,
            self.bus.to_safe_string(),
            self.pools.len(),
            self.router.strategy
        )
    }
}

impl HasConfigExamples<MahavishnuConfig> for MahavishnuConfig {
    fn examples() -> Vec<ConfigExample<MahavishnuConfig>> {
        vec![]
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BusConfig {
    pub db: DbConfig,
    /// HMAC signing secret per registered repo name
    /// (`bus.secret.<repo>`). Never logged verbatim — see `SafeDisplay`.
    pub repo_secrets: HashMap<String, String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            repo_secrets: HashMap::new(),
        }
    }
}

impl SafeDisplay for BusConfig {
    fn to_safe_string(&self) -> String {
        format!(
            "db: {}, repo_secrets: {} configured",
            self.db.to_safe_string(),
            self.repo_secrets.len()
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouterConfig {
    pub strategy: InterPoolStrategy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: InterPoolStrategy::LeastLoaded,
        }
    }
}

pub fn make_config_loader() -> mahavishnu_common::config::ConfigLoader<MahavishnuConfig> {
    mahavishnu_common::config::ConfigLoader::new_with_examples(&std::path::PathBuf::from(
        "config/mahavishnu.toml",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn config_is_loadable() {
        make_config_loader().load().expect("failed to load config");
    }

    #[test]
    fn safe_display_never_includes_repo_secrets() {
        let mut config = MahavishnuConfig::default();
        config
            .bus
            .repo_secrets
            .insert("repo-a".to_string(), "super-secret".to_string());
        assert!(!config.to_safe_string().contains("super-secret"));
    }
}
