//! Environment backend hooks
//!
//! A backend owns one isolated environment (container, worktree, VM, plain
//! directory) and is driven by the provider through these hooks:
//!
//! - `setup_environment` / `teardown_environment` bracket the environment's life
//! - `resolve_project_context` and `resolve_workspace_path` locate the project
//! - `ensure_agent_server` starts the remote executor or confirms it is running
//! - `get_diff_files` reports what changed since setup

use async_trait::async_trait;
use bridge_protocol::DiffFiles;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Failure inside a backend hook
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Hook-specific failure
    #[error("{0}")]
    Failed(String),

    /// Filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Inputs passed to `on_provider_start`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitVars {
    /// Environment to bring up
    pub environment_name: String,
    /// Actor observing this environment's notifications
    #[serde(default)]
    pub owner_id: Option<String>,
    /// Project location hint, interpreted by the backend
    #[serde(default)]
    pub project_path: Option<PathBuf>,
    /// Backend-specific settings
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl InitVars {
    /// Init vars for `environment_name`
    #[inline]
    #[must_use]
    pub fn new(environment_name: impl Into<String>) -> Self {
        Self {
            environment_name: environment_name.into(),
            ..Self::default()
        }
    }

    /// With owner
    #[inline]
    #[must_use]
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// With project location hint
    #[inline]
    #[must_use]
    pub fn with_project_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_path = Some(path.into());
        self
    }

    /// With one backend setting
    #[inline]
    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

/// Record of an environment brought up by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    /// Unique id of this incarnation
    pub id: Uuid,
    /// Environment name
    pub name: String,
    /// Backend kind
    pub provider_kind: String,
    /// When setup started
    pub created_at: DateTime<Utc>,
    /// Last lifecycle change
    pub updated_at: DateTime<Utc>,
}

impl Environment {
    /// New record stamped now
    #[must_use]
    pub fn new(name: impl Into<String>, provider_kind: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            provider_kind: provider_kind.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Hooks implemented by an environment backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnvironmentBackend: Send + Sync {
    /// Backend kind reported during registration (`local`, `docker`, ...)
    fn kind(&self) -> String;

    /// Bring the environment up
    async fn setup_environment(&self, vars: &InitVars) -> Result<(), BackendError>;

    /// Release the environment; must tolerate being called after a failed setup
    async fn teardown_environment(&self) -> Result<(), BackendError>;

    /// Absolute project path inside the environment
    async fn resolve_project_context(&self, vars: &InitVars) -> Result<PathBuf, BackendError>;

    /// Absolute workspace path inside the environment
    async fn resolve_workspace_path(&self, vars: &InitVars) -> Result<PathBuf, BackendError>;

    /// Start the remote executor, or confirm it is already running
    async fn ensure_agent_server(&self) -> Result<(), BackendError>;

    /// Files changed since setup
    async fn get_diff_files(&self) -> Result<DiffFiles, BackendError>;
}
