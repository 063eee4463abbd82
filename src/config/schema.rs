//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the forward proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, public hostname).
    pub listener: ListenerConfig,

    /// Optional upstream forwarding proxy.
    pub forward: ForwardConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Header rewriting levels of the default user.
    pub policy: PolicyConfig,

    /// Rule list persistence.
    pub rules: RulesConfig,

    /// Static resources served under `/res/`.
    pub resources: ResourcesConfig,

    /// Periodic maintenance.
    pub maintenance: MaintenanceConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind_address: String,

    /// Name the proxy is reachable under, used in local URLs.
    pub hostname: String,

    /// Maximum concurrent client connections.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            hostname: "localhost".to_string(),
            max_connections: 15,
        }
    }
}

/// Forwarding proxy configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// `host:port` of the proxy all traffic is sent through.
    pub address: Option<String>,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Origin connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Read/write timeout on established connections in seconds.
    pub server_secs: u64,

    /// Pooled origin connections idle longer than this are dropped.
    pub server_idle_secs: u64,

    /// Wait for the next request on a kept-alive client connection.
    pub client_wait_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            server_secs: 120,
            server_idle_secs: 15,
            client_wait_secs: 5,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn server(&self) -> Duration {
        Duration::from_secs(self.server_secs)
    }

    pub fn server_idle(&self) -> Duration {
        Duration::from_secs(self.server_idle_secs)
    }

    pub fn client_wait(&self) -> Duration {
        Duration::from_secs(self.client_wait_secs)
    }
}

/// Cookie handling level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CookieLevel {
    #[default]
    Pass,
    /// Consult the cookie host lists.
    Check,
    Eat,
}

/// Referer handling level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefererLevel {
    Pass,
    /// Reduce to `http://<host>/`.
    #[default]
    Trim,
    Eat,
}

/// Level for headers that can be replaced by a fixed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FakeLevel {
    Pass,
    Fake,
    Eat,
}

/// Header policy levels.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub cookies: CookieLevel,
    pub referer: RefererLevel,
    pub from: FakeLevel,
    /// Value sent when `from` is `fake`.
    pub from_value: String,
    pub agent: FakeLevel,
    /// Value sent when `agent` is `fake`.
    pub agent_value: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            cookies: CookieLevel::Pass,
            referer: RefererLevel::Trim,
            from: FakeLevel::Eat,
            from_value: "fake@from.foo".to_string(),
            agent: FakeLevel::Pass,
            agent_value: "Mozilla/4.0 (compatible; MSIE 5.5; Windows 98)".to_string(),
        }
    }
}

/// Rule list persistence configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Directory holding the six rule list files.
    pub directory: Option<PathBuf>,
}

/// Static resource configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ResourcesConfig {
    /// Directory searched before the built-in resources.
    pub directory: Option<PathBuf>,
}

/// Maintenance scheduling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Scheduler granularity in seconds.
    pub tick_secs: u64,

    /// Interval for rule re-sorting and persistence in seconds.
    pub rules_refresh_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            rules_refresh_secs: 3600,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "forward_proxy=info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
