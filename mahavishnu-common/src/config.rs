use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::SafeDisplay;

/// Marker implemented by every top-level config struct, so `ConfigLoader<T>`
/// can require `Default + Serialize + DeserializeOwned` in one bound.
pub trait ConfigLoaderConfig: Default + Serialize + DeserializeOwned {}
impl<T: Default + Serialize + DeserializeOwned> ConfigLoaderConfig for T {}

pub struct ConfigExample<T>(pub &'static str, pub T);

pub trait HasConfigExamples<T> {
    fn examples() -> Vec<ConfigExample<T>>;
}

const ENV_PREFIX: &str = "MAHAVISHNU_";

/// Builds a typed, immutable config value by layering compiled-in defaults,
/// an optional TOML file, and environment variables (dotted-path overrides
/// via `MAHAVISHNU_FOO__BAR=...`). No consumer holds a singleton — the
/// loaded value is handed to `Services::new` once at startup.
pub struct ConfigLoader<T> {
    pub config_file_name: PathBuf,
    _marker: std::marker::PhantomData<T>,
}

impl<T: ConfigLoaderConfig> ConfigLoader<T> {
    pub fn new(config_file_name: &PathBuf) -> Self {
        Self {
            config_file_name: config_file_name.clone(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn new_with_examples(config_file_name: &PathBuf) -> Self {
        Self::new(config_file_name)
    }

    pub fn figment(&self) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(T::default()));
        if self.config_file_name.exists() {
            figment = figment.merge(Toml::file(&self.config_file_name));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(&self) -> figment::Result<T> {
        self.figment().extract()
    }

    /// Mirrors the reference `--dump-config`/normal-load split used by the
    /// server binaries: returns `None` (after printing the example config)
    /// when invoked with `--dump-config`, otherwise loads normally.
    pub fn load_or_dump_config(&self) -> Option<T> {
        if std::env::args().any(|arg| arg == "--dump-config") {
            match self.load() {
                Ok(config) => {
                    if let Ok(toml) = toml::to_string_pretty(&ConfigAsToml(&config)) {
                        println!("{toml}");
                    }
                }
                Err(error) => eprintln!("Failed to load config: {error}"),
            }
            None
        } else {
            Some(self.load().expect("Failed to load configuration"))
        }
    }
}

struct ConfigAsToml<'a, T>(&'a T);

impl<T: Serialize> Serialize for ConfigAsToml<'_, T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DbConfig {
    Sqlite(DbSqliteConfig),
    Postgres(DbPostgresConfig),
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig::Sqlite(DbSqliteConfig::default())
    }
}

impl SafeDisplay for DbConfig {
    fn to_safe_string(&self) -> String {
        match self {
            DbConfig::Sqlite(c) => format!("sqlite: {}", c.database),
            DbConfig::Postgres(c) => {
                format!("postgres: {}:{}/{}", c.host, c.port, c.database)
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbSqliteConfig {
    pub database: String,
    pub max_connections: u32,
}

impl Default for DbSqliteConfig {
    fn default() -> Self {
        Self {
            database: "mahavishnu.db".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbPostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_connections: u32,
}

impl Default for DbPostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "mahavishnu".to_string(),
            username: "mahavishnu".to_string(),
            password: String::new(),
            max_connections: 10,
        }
    }
}

impl SafeDisplay for DbPostgresConfig {
    fn to_safe_string(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "host: {}", self.host);
        let _ = writeln!(out, "port: {}", self.port);
        let _ = writeln!(out, "database: {}", self.database);
        let _ = write!(out, "username: {}", self.username);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
    struct ExampleConfig {
        port: u16,
        name: String,
    }

    #[test]
    fn defaults_load_without_a_file() {
        let loader: ConfigLoader<ExampleConfig> =
            ConfigLoader::new(&PathBuf::from("/nonexistent/config.toml"));
        let loaded = loader.load().expect("should fall back to defaults");
        assert_eq!(loaded, ExampleConfig::default());
    }
}
