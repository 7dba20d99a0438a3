//! TOML configuration.
//!
//! Each service reads `/usr/local/etc/<appname>.conf`; `MERCATO_CONFIG`
//! overrides the path for local runs. Missing keys fall back to the
//! defaults below, a missing or unparsable file is a startup failure.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use mercato_core::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub listen_port: u16,
    pub log_level: String,
    pub db_config: DbConfig,
    pub redis_config: RedisConfig,
    pub processor_config: ProcessorConfig,
    pub jwt_config: JwtConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 8000,
            log_level: "info".to_string(),
            db_config: DbConfig::default(),
            redis_config: RedisConfig::default(),
            processor_config: ProcessorConfig::default(),
            jwt_config: JwtConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub sslmode: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "mercato".to_string(),
            password: String::new(),
            database: "mercato".to_string(),
            sslmode: "disable".to_string(),
        }
    }
}

impl DbConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.database, self.sslmode
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: u8,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "redis".to_string(),
            port: 6379,
            db: 0,
        }
    }
}

impl RedisConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProcessorConfig {
    /// Optimistic-lock retry budget per mutation.
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    /// Coordinator-level re-picks of a failed courier reservation.
    pub cour_reserve_retry_count: u32,
    pub queue_capacity: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay_ms: 1000,
            cour_reserve_retry_count: 3,
            queue_capacity: 256,
        }
    }
}

impl ProcessorConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_count, Duration::from_millis(self.retry_delay_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct JwtConfig {
    pub secret: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
        }
    }
}

impl Config {
    /// Resolve the config path for this app.
    pub fn path_for(app_name: &str) -> PathBuf {
        match std::env::var("MERCATO_CONFIG") {
            Ok(path) => PathBuf::from(path),
            Err(_) => PathBuf::from(format!("/usr/local/etc/{app_name}.conf")),
        }
    }

    pub fn load(app_name: &str) -> Result<Self, ConfigError> {
        let path = Self::path_for(app_name);
        let display = path.display().to_string();

        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;

        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kebab_case_sections() {
        let raw = r#"
            listen-port = 9000
            log-level = "debug"

            [db-config]
            host = "db.internal"
            password = "hunter2"

            [processor-config]
            retry-count = 5
            retry-delay-ms = 50
        "#;

        let cfg: Config = toml::from_str(raw).unwrap();
        assert_eq!(cfg.listen_port, 9000);
        assert_eq!(cfg.db_config.host, "db.internal");
        // Unset keys keep their defaults.
        assert_eq!(cfg.db_config.port, 5432);
        assert_eq!(cfg.processor_config.retry_count, 5);
        assert_eq!(cfg.processor_config.retry_policy().delay.as_millis(), 50);
    }

    #[test]
    fn db_url_includes_sslmode() {
        let cfg = DbConfig {
            host: "h".into(),
            port: 5433,
            user: "u".into(),
            password: "p".into(),
            database: "d".into(),
            sslmode: "disable".into(),
        };
        assert_eq!(cfg.url(), "postgres://u:p@h:5433/d?sslmode=disable");
    }
}
