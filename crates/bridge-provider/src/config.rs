//! Provider configuration
//!
//! Loaded from TOML, then overridden from the environment:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `BRIDGE_AGENT_HOST` | `agent_server.host` |
//! | `BRIDGE_AGENT_PORT` | `agent_server.port` |
//! | `BRIDGE_RECONNECT_ATTEMPTS` | `reconnect.max_attempts` |
//! | `BRIDGE_RECONNECT_DELAY_MS` | `reconnect.delay_ms` |
//!
//! The `[heartbeat]` table has no default; a config without it is rejected.

use crate::error::ProviderError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Link kind used to reach the remote executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// `ws://host:port/path`
    #[default]
    WebSocket,
    /// In-process link; the connector must be supplied by the caller
    Memory,
}

/// Where the remote executor listens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentServerConfig {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Link kind
    #[serde(default)]
    pub transport: TransportKind,
    /// URL path, without the leading slash
    #[serde(default)]
    pub path: Option<String>,
}

impl AgentServerConfig {
    /// WebSocket server at `host:port`
    #[inline]
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            transport: TransportKind::WebSocket,
            path: None,
        }
    }

    /// With link kind
    #[inline]
    #[must_use]
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// With URL path
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// WebSocket URL of the server
    #[must_use]
    pub fn url(&self) -> String {
        let path = self.path.as_deref().unwrap_or("").trim_start_matches('/');
        format!("ws://{}:{}/{}", self.host, self.port, path)
    }
}

/// Delay growth between reconnection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay every time
    #[default]
    Fixed,
    /// Delay doubles per attempt, capped at `max_delay_ms`
    Exponential,
}

/// Bounded reconnection policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Attempts after the first failure before giving up
    pub max_attempts: u32,
    /// Base delay before each attempt
    pub delay_ms: u64,
    /// Delay growth
    #[serde(default)]
    pub backoff: Backoff,
    /// Upper bound for exponential delays
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl ReconnectConfig {
    /// Fixed-delay policy
    #[inline]
    #[must_use]
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay_ms,
            backoff: Backoff::Fixed,
            max_delay_ms: default_max_delay_ms(),
        }
    }

    /// Exponential policy capped at `max_delay_ms`
    #[inline]
    #[must_use]
    pub fn exponential(max_attempts: u32, delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay_ms,
            backoff: Backoff::Exponential,
            max_delay_ms,
        }
    }

    /// Delay before attempt number `attempt` (1-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let millis = match self.backoff {
            Backoff::Fixed => self.delay_ms,
            Backoff::Exponential => {
                let exponent = attempt.saturating_sub(1).min(20);
                self.delay_ms.saturating_mul(1 << exponent).min(self.max_delay_ms)
            }
        };
        Duration::from_millis(millis)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(5, 1_000)
    }
}

/// Time budgets of the lifecycle phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimeouts {
    /// Backend setup and context resolution
    pub setup_ms: u64,
    /// Opening one link
    pub connection_ms: u64,
    /// Backend teardown
    pub cleanup_ms: u64,
}

impl PhaseTimeouts {
    /// Setup budget
    #[inline]
    #[must_use]
    pub fn setup(&self) -> Duration {
        Duration::from_millis(self.setup_ms)
    }

    /// Connection budget
    #[inline]
    #[must_use]
    pub fn connection(&self) -> Duration {
        Duration::from_millis(self.connection_ms)
    }

    /// Teardown budget
    #[inline]
    #[must_use]
    pub fn cleanup(&self) -> Duration {
        Duration::from_millis(self.cleanup_ms)
    }
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            setup_ms: 120_000,
            connection_ms: 10_000,
            cleanup_ms: 30_000,
        }
    }
}

/// Keep-alive policy
///
/// How many missed beats make a connection dead depends on the environment,
/// so there is deliberately no default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Time between beats
    pub interval_ms: u64,
    /// Consecutive unanswered beats before the link is closed
    pub max_missed: u32,
    /// How long to wait for each ack; defaults to `interval_ms`, never 0
    #[serde(default)]
    pub ack_timeout_ms: Option<u64>,
}

impl HeartbeatConfig {
    /// Policy with the ack timeout equal to the interval
    #[inline]
    #[must_use]
    pub fn new(interval_ms: u64, max_missed: u32) -> Self {
        Self {
            interval_ms,
            max_missed,
            ack_timeout_ms: None,
        }
    }

    /// With a separate ack timeout
    #[inline]
    #[must_use]
    pub fn with_ack_timeout(mut self, ack_timeout_ms: u64) -> Self {
        self.ack_timeout_ms = Some(ack_timeout_ms);
        self
    }

    /// Beat interval
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Ack deadline per beat
    #[inline]
    #[must_use]
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms.unwrap_or(self.interval_ms))
    }
}

/// Full provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Remote executor endpoint
    pub agent_server: AgentServerConfig,
    /// Reconnection policy
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Registration handshake deadline; 0 waits indefinitely
    #[serde(default = "default_registration_timeout_ms")]
    pub registration_timeout_ms: u64,
    /// Phase budgets
    #[serde(default)]
    pub timeouts: PhaseTimeouts,
    /// Keep-alive policy (required)
    pub heartbeat: HeartbeatConfig,
}

fn default_registration_timeout_ms() -> u64 {
    10_000
}

impl ProviderConfig {
    /// Configuration with default reconnection policy and timeouts
    #[must_use]
    pub fn new(agent_server: AgentServerConfig, heartbeat: HeartbeatConfig) -> Self {
        Self {
            agent_server,
            reconnect: ReconnectConfig::default(),
            registration_timeout_ms: default_registration_timeout_ms(),
            timeouts: PhaseTimeouts::default(),
            heartbeat,
        }
    }

    /// With reconnection policy
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// With phase budgets
    #[inline]
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: PhaseTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// With registration deadline
    #[inline]
    #[must_use]
    pub fn with_registration_timeout(mut self, timeout_ms: u64) -> Self {
        self.registration_timeout_ms = timeout_ms;
        self
    }

    /// Registration deadline; `None` waits indefinitely
    #[must_use]
    pub fn registration_timeout(&self) -> Option<Duration> {
        (self.registration_timeout_ms > 0).then(|| Duration::from_millis(self.registration_timeout_ms))
    }

    /// Parse and validate TOML, without environment overrides
    ///
    /// # Errors
    /// Returns `ProviderError::Config` for malformed TOML, a missing
    /// `[heartbeat]` table, or out-of-range values
    pub fn from_toml_str(text: &str) -> Result<Self, ProviderError> {
        let config: Self = toml::from_str(text).map_err(|e| ProviderError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file and apply process environment overrides
    ///
    /// # Errors
    /// Returns `ProviderError::Config` if the file cannot be read or is invalid
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ProviderError::Config(format!("{}: {e}", path.display())))?;
        let mut config: Self = toml::from_str(&text).map_err(|e| ProviderError::Config(e.to_string()))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "provider config loaded");
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment)
    ///
    /// # Errors
    /// Returns `ProviderError::Config` if a numeric override does not parse
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ProviderError> {
        if let Some(host) = lookup("BRIDGE_AGENT_HOST") {
            self.agent_server.host = host;
        }
        if let Some(port) = lookup("BRIDGE_AGENT_PORT") {
            self.agent_server.port = parse_override("BRIDGE_AGENT_PORT", &port)?;
        }
        if let Some(attempts) = lookup("BRIDGE_RECONNECT_ATTEMPTS") {
            self.reconnect.max_attempts = parse_override("BRIDGE_RECONNECT_ATTEMPTS", &attempts)?;
        }
        if let Some(delay) = lookup("BRIDGE_RECONNECT_DELAY_MS") {
            self.reconnect.delay_ms = parse_override("BRIDGE_RECONNECT_DELAY_MS", &delay)?;
        }
        Ok(())
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns `ProviderError::Config` naming the first bad field
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.agent_server.host.is_empty() {
            return Err(ProviderError::Config("agent_server.host is empty".into()));
        }
        if self.agent_server.port == 0 && self.agent_server.transport == TransportKind::WebSocket {
            return Err(ProviderError::Config("agent_server.port must be non-zero".into()));
        }
        if self.heartbeat.interval_ms == 0 {
            return Err(ProviderError::Config("heartbeat.interval_ms must be positive".into()));
        }
        if self.heartbeat.max_missed == 0 {
            return Err(ProviderError::Config("heartbeat.max_missed must be at least 1".into()));
        }
        if self.heartbeat.ack_timeout_ms == Some(0) {
            // A zero wait on the transport never expires, so a silent peer would go unnoticed.
            return Err(ProviderError::Config("heartbeat.ack_timeout_ms must be positive".into()));
        }
        let budgets = [
            ("timeouts.setup_ms", self.timeouts.setup_ms),
            ("timeouts.connection_ms", self.timeouts.connection_ms),
            ("timeouts.cleanup_ms", self.timeouts.cleanup_ms),
        ];
        if let Some((field, _)) = budgets.iter().find(|(_, ms)| *ms == 0) {
            return Err(ProviderError::Config(format!("{field} must be positive")));
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ProviderError> {
    value
        .trim()
        .parse()
        .map_err(|_| ProviderError::Config(format!("{key}: invalid value {value:?}")))
}
