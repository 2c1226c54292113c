//! Configuration types for throttled-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

use crate::token_bucket::DEFAULT_PERMIT_SIZE;

/// HTTP listener configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1:8080)
    #[serde(default = "default_bind_address")]
    #[schema(value_type = String)]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

/// Where served files live
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct FilesConfig {
    /// Root directory every request path is resolved against (default: "./files")
    #[serde(default = "default_root_dir")]
    #[schema(value_type = String)]
    pub root_dir: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
        }
    }
}

/// Chunk scheduling configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TransferConfig {
    /// Seconds a transfer may stay open before the transport times it out (default: 3600)
    #[serde(default = "default_async_timeout", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub async_timeout: Duration,

    /// Number of worker tasks executing chunk activations (default: 8)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Milliseconds to wait before re-queueing a denied transfer (default: 0 = immediately)
    #[serde(default, with = "duration_millis_serde")]
    #[schema(value_type = u64)]
    pub denied_retry_delay: Duration,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            async_timeout: default_async_timeout(),
            workers: default_workers(),
            denied_retry_delay: Duration::ZERO,
            event_buffer: default_event_buffer(),
        }
    }
}

/// Which admission gate the service installs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ThrottlePolicy {
    /// One bucket shared by every transfer
    #[default]
    Global,
    /// One bucket per transfer
    PerRequest,
    /// Every permit request is granted
    Unlimited,
}

/// Bandwidth throttling configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ThrottleConfig {
    /// Gate selection (default: global)
    #[serde(default)]
    pub policy: ThrottlePolicy,

    /// Aggregate limit in bytes per second for the global policy (None = unlimited)
    #[serde(default)]
    pub limit_bps: Option<u64>,

    /// Per-transfer limit in bytes per second, required by the per_request policy
    #[serde(default)]
    pub per_request_limit_bps: Option<u64>,

    /// Bytes granted by one permit, also the chunk size (default: 4096)
    #[serde(default = "default_permit_size")]
    pub permit_size: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            policy: ThrottlePolicy::default(),
            limit_bps: None,
            per_request_limit_bps: None,
            permit_size: default_permit_size(),
        }
    }
}

/// Main configuration for the download service
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Served file location
    #[serde(default)]
    pub files: FilesConfig,

    /// Chunk scheduling settings
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Bandwidth throttling settings
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

impl Config {
    /// Load a configuration from a JSON file, filling absent fields with defaults
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.transfer.workers == 0 {
            return Err(Error::config("transfer.workers", "must be at least 1"));
        }
        if self.throttle.permit_size == 0 {
            return Err(Error::config("throttle.permit_size", "must be at least 1 byte"));
        }
        if self.throttle.policy == ThrottlePolicy::PerRequest
            && self.throttle.per_request_limit_bps.is_none()
        {
            return Err(Error::config(
                "throttle.per_request_limit_bps",
                "required when policy is per_request",
            ));
        }
        Ok(())
    }
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("./files")
}

fn default_async_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_workers() -> usize {
    8
}

fn default_event_buffer() -> usize {
    1000
}

fn default_permit_size() -> usize {
    DEFAULT_PERMIT_SIZE
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
