//! Configuration for the node agent.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};
use fnagent_image_cache::ImageCacheConfig;

/// Container runtime backing the image cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    /// Docker Engine over its Unix socket.
    Docker,
    /// In-memory runtime for local development.
    Mock,
}

impl FromStr for RuntimeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(RuntimeKind::Docker),
            "mock" => Ok(RuntimeKind::Mock),
            other => bail!("unknown runtime '{other}', expected 'docker' or 'mock'"),
        }
    }
}

/// Node agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Which runtime removes images.
    pub runtime: RuntimeKind,

    /// Docker Engine API socket.
    pub docker_socket: String,

    /// Image cache capacity and removal timeout.
    pub cache: ImageCacheConfig,

    /// Interval between background reclaim checks in seconds.
    pub reclaim_interval_secs: u64,

    /// Register images already present in the runtime at startup.
    pub seed_from_runtime: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let runtime = match std::env::var("FNAGENT_RUNTIME") {
            Ok(value) => value.parse()?,
            Err(_) => RuntimeKind::Docker,
        };

        let docker_socket = std::env::var("FNAGENT_DOCKER_SOCKET")
            .unwrap_or_else(|_| "/var/run/docker.sock".to_string());

        let defaults = ImageCacheConfig::default();
        let max_size_bytes =
            env_parse("FNAGENT_IMAGE_CACHE_MAX_BYTES").unwrap_or(defaults.max_size_bytes);
        let removal_timeout = env_parse("FNAGENT_IMAGE_REMOVAL_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.removal_timeout);

        let reclaim_interval_secs = env_parse("FNAGENT_RECLAIM_INTERVAL_SECS").unwrap_or(30);

        let seed_from_runtime = std::env::var("FNAGENT_SEED_FROM_RUNTIME")
            .map(|v| parse_bool(&v))
            .unwrap_or(true);

        Ok(Self {
            runtime,
            docker_socket,
            cache: ImageCacheConfig {
                max_size_bytes,
                removal_timeout,
            },
            reclaim_interval_secs,
            seed_from_runtime,
        })
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs.max(1))
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
