// ABOUTME: Configuration for the per-server socket pool and the server list
//
// Defines the tunables every node pool shares:
// - Pool sizing (min/max sockets per server)
// - Connection, queue, receive and dead-node timeouts
// - Linger and TCP keep-alive options
// - Failure policy selection
//
// `PoolSettings` is the raw, serde-facing form. `SocketPoolConfig` is the
// validated, read-only form the pools use; invalid values never get past
// `PoolSettings::build()`.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::failure_policy::FailurePolicy;

// === Node Endpoint ===

/// Address of one remote cache server (`host:port`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeEndpoint(String);

impl NodeEndpoint {
    /// Parse and validate a `host:port` address
    pub fn new(addr: impl Into<String>) -> Result<Self, ConfigError> {
        let addr = addr.into();
        let trimmed = addr.trim();

        let Some((host, port)) = trimmed.rsplit_once(':') else {
            return Err(ConfigError::InvalidEndpoint(addr));
        };
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(ConfigError::InvalidEndpoint(addr));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// The address as given in configuration
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeEndpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for NodeEndpoint {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeEndpoint> for String {
    fn from(endpoint: NodeEndpoint) -> Self {
        endpoint.0
    }
}

// === Pool Settings (raw) ===

/// Socket pool tunables as written in a config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Sockets kept open per server once the pool is warmed up
    pub min_pool_size: usize,

    /// Hard cap on sockets (idle + in use) per server
    pub max_pool_size: usize,

    /// Time allowed to establish a new connection
    #[serde(with = "duration_millis")]
    pub connection_timeout: Duration,

    /// Maximum wait for a socket from the pool, including any connect
    #[serde(with = "duration_millis")]
    pub queue_timeout: Duration,

    /// Time allowed for a single send or receive on a pooled socket
    #[serde(with = "duration_millis")]
    pub receive_timeout: Duration,

    /// Interval between revival probes of a dead server
    #[serde(with = "duration_millis")]
    pub dead_timeout: Duration,

    /// Upper bound for a graceful close when linger is enabled
    #[serde(with = "duration_millis")]
    pub linger_time: Duration,

    /// Apply `linger_time` when closing sockets
    pub linger_enabled: bool,

    /// Enable TCP keep-alive probes on pooled sockets
    pub tcp_keep_alive_enabled: bool,

    /// Idle time before the first keep-alive probe
    #[serde(with = "duration_millis")]
    pub tcp_keep_alive_time: Duration,

    /// Interval between unacknowledged keep-alive probes
    #[serde(with = "duration_millis")]
    pub tcp_keep_alive_interval: Duration,

    /// How failures decide that a server is dead
    pub failure_policy: FailurePolicy,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_pool_size: 10,
            max_pool_size: 20,

            connection_timeout: Duration::from_secs(10),
            queue_timeout: Duration::from_millis(100),
            receive_timeout: Duration::from_secs(10),
            dead_timeout: Duration::from_secs(10),

            linger_time: Duration::ZERO,
            linger_enabled: false,

            tcp_keep_alive_enabled: false,
            tcp_keep_alive_time: Duration::from_secs(2 * 60 * 60), // 2 hours
            tcp_keep_alive_interval: Duration::from_secs(1),

            failure_policy: FailurePolicy::default(),
        }
    }
}

impl PoolSettings {
    /// Validate and freeze these settings
    pub fn build(self) -> Result<SocketPoolConfig, ConfigError> {
        SocketPoolConfig::try_from(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pool_size == 0 {
            return Err(ConfigError::ZeroMaxPoolSize);
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(ConfigError::MinExceedsMax {
                min: self.min_pool_size,
                max: self.max_pool_size,
            });
        }

        // A zero dead timeout would turn revival probing into a busy loop
        if self.dead_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "dead_timeout",
            });
        }

        if self.tcp_keep_alive_enabled {
            if self.tcp_keep_alive_time.is_zero() {
                return Err(ConfigError::ZeroDuration {
                    field: "tcp_keep_alive_time",
                });
            }
            if self.tcp_keep_alive_interval.is_zero() {
                return Err(ConfigError::ZeroDuration {
                    field: "tcp_keep_alive_interval",
                });
            }
        }

        self.failure_policy.validate()
    }
}

// === Socket Pool Config (validated) ===

/// Validated, read-only socket pool configuration shared by every node pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PoolSettings", into = "PoolSettings")]
pub struct SocketPoolConfig(PoolSettings);

impl Default for SocketPoolConfig {
    fn default() -> Self {
        Self(PoolSettings::default())
    }
}

impl TryFrom<PoolSettings> for SocketPoolConfig {
    type Error = ConfigError;

    fn try_from(settings: PoolSettings) -> Result<Self, Self::Error> {
        settings.validate()?;
        Ok(Self(settings))
    }
}

impl From<SocketPoolConfig> for PoolSettings {
    fn from(config: SocketPoolConfig) -> Self {
        config.0
    }
}

impl SocketPoolConfig {
    /// Start from the defaults
    pub fn settings() -> PoolSettings {
        PoolSettings::default()
    }

    /// Raw settings, e.g. to derive a modified configuration
    pub const fn as_settings(&self) -> &PoolSettings {
        &self.0
    }

    pub const fn min_pool_size(&self) -> usize {
        self.0.min_pool_size
    }

    pub const fn max_pool_size(&self) -> usize {
        self.0.max_pool_size
    }

    pub const fn connection_timeout(&self) -> Duration {
        self.0.connection_timeout
    }

    pub const fn queue_timeout(&self) -> Duration {
        self.0.queue_timeout
    }

    pub const fn receive_timeout(&self) -> Duration {
        self.0.receive_timeout
    }

    pub const fn dead_timeout(&self) -> Duration {
        self.0.dead_timeout
    }

    pub const fn linger_time(&self) -> Duration {
        self.0.linger_time
    }

    pub const fn linger_enabled(&self) -> bool {
        self.0.linger_enabled
    }

    /// Linger bound to apply on close, `None` when linger is disabled
    pub const fn linger(&self) -> Option<Duration> {
        if self.0.linger_enabled {
            Some(self.0.linger_time)
        } else {
            None
        }
    }

    pub const fn tcp_keep_alive_enabled(&self) -> bool {
        self.0.tcp_keep_alive_enabled
    }

    pub const fn tcp_keep_alive_time(&self) -> Duration {
        self.0.tcp_keep_alive_time
    }

    pub const fn tcp_keep_alive_interval(&self) -> Duration {
        self.0.tcp_keep_alive_interval
    }

    /// Failure policy handed to every node pool (each gets its own state)
    pub const fn failure_policy(&self) -> FailurePolicy {
        self.0.failure_policy
    }
}

// === Client Config ===

/// Top-level configuration: the fixed server list plus pool tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Cache servers, in configuration order
    pub servers: Vec<NodeEndpoint>,

    /// Socket pool tunables applied to every server
    #[serde(default)]
    pub socket_pool: SocketPoolConfig,
}

impl ClientConfig {
    /// Build from an explicit server list, rejecting empty or duplicate lists
    pub fn new(servers: Vec<NodeEndpoint>, socket_pool: SocketPoolConfig) -> Result<Self, ConfigError> {
        let config = Self {
            servers,
            socket_pool,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    /// Render back to TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Load(e.to_string()))
    }

    /// Default config location: `<config dir>/cache-pool/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cache-pool")
            .join("config.toml")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::NoServers);
        }

        let mut seen = HashSet::with_capacity(self.servers.len());
        for server in &self.servers {
            if !seen.insert(server) {
                return Err(ConfigError::DuplicateServer(server.to_string()));
            }
        }

        Ok(())
    }
}

/// Serde helper for Duration as milliseconds (u64)
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
