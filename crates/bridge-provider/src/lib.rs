//! Bridge Provider - lifecycle controller for one isolated environment
//!
//! A [`Provider`] walks an environment through
//! `Idle -> SettingUp -> Connecting -> Connected <-> Active -> TearingDown -> Closed`,
//! reconnecting within a configured bound and failing loudly once that bound
//! is spent. It is built from:
//! - [`EnvironmentBackend`] hooks that own the environment itself
//! - A [`Connector`](bridge_transport::Connector) to the remote executor
//! - The process-wide [`ConnectionRegistry`](bridge_registry::ConnectionRegistry)
//!
//! # Example
//!
//! ```rust,ignore
//! use bridge_provider::{InitVars, LocalBackend, Provider, ProviderConfig};
//! use bridge_registry::ConnectionRegistry;
//! use std::sync::Arc;
//!
//! let config = ProviderConfig::load("provider.toml")?;
//! let registry = ConnectionRegistry::init(bridge_registry::DEFAULT_CAPACITY);
//! let provider = Provider::new(config, Arc::new(LocalBackend::new()), registry)?;
//!
//! provider
//!     .on_provider_start(InitVars::new("scratch").with_project_path("/srv/scratch"))
//!     .await?;
//! // ...
//! provider.close().await?;
//! ```

#![warn(unreachable_pub)]

pub mod backend;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod local;
pub mod phase;
pub mod provider;
pub mod telemetry;

pub use backend::{BackendError, Environment, EnvironmentBackend, InitVars};
pub use config::{
    AgentServerConfig, Backoff, HeartbeatConfig, PhaseTimeouts, ProviderConfig, ReconnectConfig,
    TransportKind,
};
pub use error::{ProviderError, Result};
pub use heartbeat::HeartbeatOutcome;
pub use local::LocalBackend;
pub use phase::{allowed_transitions, validate_transition, ProviderPhase};
pub use provider::{Provider, ProviderState};
pub use telemetry::LogFormat;
