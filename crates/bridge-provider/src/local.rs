//! Plain-directory backend
//!
//! Treats an existing (or freshly created) directory as the environment. No
//! isolation; the remote executor is assumed to be running already. Changes
//! are detected by comparing file sizes and modification times against a
//! snapshot taken at setup.

use crate::backend::{BackendError, EnvironmentBackend, InitVars};
use async_trait::async_trait;
use bridge_protocol::{DiffFile, DiffFiles};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Setting naming the directory when `project_path` is absent
pub const ROOT_SETTING: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

type Snapshot = BTreeMap<String, FileStamp>;

#[derive(Debug, Default)]
struct LocalState {
    root: Option<PathBuf>,
    baseline: Snapshot,
}

/// Backend over a local directory
#[derive(Debug, Default)]
pub struct LocalBackend {
    state: Mutex<LocalState>,
}

impl LocalBackend {
    /// Backend with no directory yet; the directory comes from `InitVars`
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory in use, once set up
    #[must_use]
    pub fn root(&self) -> Option<PathBuf> {
        self.state.lock().root.clone()
    }

    fn requested_root(vars: &InitVars) -> Result<PathBuf, BackendError> {
        vars.project_path
            .clone()
            .or_else(|| vars.config.get(ROOT_SETTING).map(PathBuf::from))
            .ok_or_else(|| BackendError::Failed("no project directory given".into()))
    }

    fn current_root(&self) -> Result<PathBuf, BackendError> {
        self.root()
            .ok_or_else(|| BackendError::Failed("environment is not set up".into()))
    }
}

#[async_trait]
impl EnvironmentBackend for LocalBackend {
    fn kind(&self) -> String {
        "local".to_string()
    }

    async fn setup_environment(&self, vars: &InitVars) -> Result<(), BackendError> {
        let requested = Self::requested_root(vars)?;
        tokio::fs::create_dir_all(&requested).await?;
        let root = tokio::fs::canonicalize(&requested).await?;
        let baseline = snapshot(&root).await?;

        tracing::debug!(root = %root.display(), files = baseline.len(), "local environment ready");
        let mut state = self.state.lock();
        state.root = Some(root);
        state.baseline = baseline;
        Ok(())
    }

    async fn teardown_environment(&self) -> Result<(), BackendError> {
        // The directory belongs to the user; only forget about it.
        let mut state = self.state.lock();
        state.root = None;
        state.baseline.clear();
        Ok(())
    }

    async fn resolve_project_context(&self, _vars: &InitVars) -> Result<PathBuf, BackendError> {
        self.current_root()
    }

    async fn resolve_workspace_path(&self, _vars: &InitVars) -> Result<PathBuf, BackendError> {
        self.current_root()
    }

    async fn ensure_agent_server(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn get_diff_files(&self) -> Result<DiffFiles, BackendError> {
        let root = self.current_root()?;
        let current = snapshot(&root).await?;
        let baseline = self.state.lock().baseline.clone();
        Ok(diff_snapshots(&baseline, &current))
    }
}

async fn snapshot(root: &Path) -> Result<Snapshot, BackendError> {
    let mut files = Snapshot::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            let path = entry.path();
            if meta.is_dir() {
                pending.push(path);
            } else if let Ok(relative) = path.strip_prefix(root) {
                files.insert(
                    relative.to_string_lossy().replace('\\', "/"),
                    FileStamp {
                        len: meta.len(),
                        modified: meta.modified().ok(),
                    },
                );
            }
        }
    }
    Ok(files)
}

fn diff_snapshots(baseline: &Snapshot, current: &Snapshot) -> DiffFiles {
    let mut changed: BTreeMap<&str, &'static str> = BTreeMap::new();

    for (path, stamp) in current {
        match baseline.get(path) {
            None => {
                changed.insert(path, "added");
            }
            Some(old) if old != stamp => {
                changed.insert(path, "modified");
            }
            Some(_) => {}
        }
    }
    for path in baseline.keys() {
        if !current.contains_key(path) {
            changed.insert(path, "deleted");
        }
    }

    let files: Vec<DiffFile> = changed
        .into_iter()
        .map(|(path, status)| DiffFile {
            path: path.to_string(),
            status: status.to_string(),
            diff: None,
        })
        .collect();
    DiffFiles {
        has_changes: !files.is_empty(),
        files,
    }
}
