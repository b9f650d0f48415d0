use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub broker: BrokerConfig,
    /// Fixed deadline applied to every store, cache and broker call.
    pub io_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `memory` for the in-process store, otherwise a `sqlite:` URL.
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 0 means unbounded: entries live until overwritten or deleted.
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub topic: String,
    pub partitions: usize,
    pub publish_permits: usize,
    pub consumer_poll_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "memory".to_string(),
            },
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            cache: CacheConfig { capacity: 0 },
            broker: BrokerConfig {
                topic: "notifications".to_string(),
                partitions: 3,
                publish_permits: 64,
                consumer_poll_timeout_ms: 10_000,
            },
            io_timeout_ms: 10_000,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let config = Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: env_or("SERVER_PORT", defaults.server.port),
            },
            cache: CacheConfig {
                capacity: env_or("CACHE_CAPACITY", defaults.cache.capacity),
            },
            broker: BrokerConfig {
                topic: env::var("BROKER_TOPIC").unwrap_or(defaults.broker.topic),
                partitions: env_or("BROKER_PARTITIONS", defaults.broker.partitions),
                publish_permits: env_or("BROKER_PUBLISH_PERMITS", defaults.broker.publish_permits),
                consumer_poll_timeout_ms: env_or(
                    "CONSUMER_POLL_TIMEOUT_MS",
                    defaults.broker.consumer_poll_timeout_ms,
                ),
            },
            io_timeout_ms: env_or("IO_TIMEOUT_MS", defaults.io_timeout_ms),
        };

        if config.broker.partitions == 0 {
            anyhow::bail!("BROKER_PARTITIONS must be at least 1");
        }
        if config.broker.publish_permits == 0 {
            anyhow::bail!("BROKER_PUBLISH_PERMITS must be at least 1");
        }

        Ok(config)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn consumer_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.broker.consumer_poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.database.url, "memory");
        assert_eq!(config.cache.capacity, 0);
        assert_eq!(config.io_timeout(), Duration::from_secs(10));
        assert_eq!(config.server_address(), "0.0.0.0:3000");
    }
}
