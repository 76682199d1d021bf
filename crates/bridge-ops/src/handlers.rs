//! File and folder operation handlers
//!
//! Each handler:
//! 1. Validates its target path; failure returns at once with no notification
//! 2. Emits the request notification
//! 3. Checks preconditions, then executes
//! 4. Emits the result notification (success and I/O failure only) and returns
//!    the response
//!
//! Conflict and not-found failures are reported through the response alone.
//! Creates check and create in one filesystem call, so concurrent creates of
//! one path leave a single winner.

use crate::error::OperationError;
use crate::fs::{FileSystem, TokioFileSystem};
use crate::path::{PathError, SafePath};
use crate::relay::NotificationRelay;
use bridge_protocol::{
    CreateFileRequest, CreateFolderRequest, DeleteFileRequest, DeleteFolderRequest, FsVerb,
    ListDirectoryRequest, OperationResponse, ReadFileRequest, WriteToFileRequest,
};
use serde::Serialize;
use std::future::Future;
use std::io;
use std::sync::Arc;

/// Path-checked file operations with paired notifications
#[derive(Clone)]
pub struct FileOperations {
    relay: NotificationRelay,
    fs: Arc<dyn FileSystem>,
    project_root: Option<SafePath>,
}

impl std::fmt::Debug for FileOperations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileOperations")
            .field("project_root", &self.project_root)
            .finish_non_exhaustive()
    }
}

impl FileOperations {
    /// Handlers over the real filesystem
    #[must_use]
    pub fn new(relay: NotificationRelay) -> Self {
        Self::with_file_system(relay, Arc::new(TokioFileSystem))
    }

    /// Handlers over a custom filesystem
    #[must_use]
    pub fn with_file_system(relay: NotificationRelay, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            relay,
            fs,
            project_root: None,
        }
    }

    /// Directory that `writeToFile` paths are relative to
    #[inline]
    #[must_use]
    pub fn with_project_root(mut self, root: SafePath) -> Self {
        self.project_root = Some(root);
        self
    }

    /// Change the project directory
    pub fn set_project_root(&mut self, root: SafePath) {
        self.project_root = Some(root);
    }

    /// Current project directory
    #[inline]
    #[must_use]
    pub fn project_root(&self) -> Option<&SafePath> {
        self.project_root.as_ref()
    }

    /// Create a new file, creating its directory if needed
    pub async fn create_file(&self, owner_id: Option<&str>, request: &CreateFileRequest) -> OperationResponse {
        let path = match SafePath::parse(&request.file_path) {
            Ok(path) => path,
            Err(e) => return Self::rejected(FsVerb::CreateFile, e),
        };

        self.relayed(owner_id, FsVerb::CreateFile, request, async {
            let conflict = || OperationError::Conflict(format!("File already exists: {path}"));
            if self.exists(&path).await? {
                return Err(conflict());
            }
            if let Some(parent) = path.parent() {
                self.fs
                    .create_dir_all(parent)
                    .await
                    .map_err(|e| OperationError::io(format!("create directory {}", parent.display()), e))?;
            }
            // A concurrent create can still win after the check above.
            self.fs
                .create_new(path.as_path(), request.source.as_bytes())
                .await
                .map_err(|e| match e.kind() {
                    io::ErrorKind::AlreadyExists => conflict(),
                    _ => OperationError::io(format!("write {path}"), e),
                })?;
            Ok(OperationResponse::file_ok(path.to_string()))
        })
        .await
    }

    /// Read a file
    pub async fn read_file(&self, owner_id: Option<&str>, request: &ReadFileRequest) -> OperationResponse {
        let path = match SafePath::parse(&request.file_path) {
            Ok(path) => path,
            Err(e) => return Self::rejected(FsVerb::ReadFile, e),
        };

        self.relayed(owner_id, FsVerb::ReadFile, request, async {
            if !self.exists(&path).await? {
                return Err(OperationError::NotFound(format!("File does not exist: {path}")));
            }
            let content = self
                .fs
                .read_to_string(path.as_path())
                .await
                .map_err(|e| OperationError::io(format!("read {path}"), e))?;
            Ok(OperationResponse::file_ok(path.to_string()).with_content(content))
        })
        .await
    }

    /// Create or overwrite a file addressed relative to the project directory
    pub async fn write_to_file(&self, owner_id: Option<&str>, request: &WriteToFileRequest) -> OperationResponse {
        let resolved = self
            .project_root
            .as_ref()
            .ok_or(PathError::NoProjectRoot)
            .and_then(|root| SafePath::resolve_under(root, &request.rel_path));
        let path = match resolved {
            Ok(path) => path,
            Err(e) => return Self::rejected(FsVerb::WriteToFile, e),
        };

        self.relayed(owner_id, FsVerb::WriteToFile, request, async {
            if let Some(parent) = path.parent() {
                self.fs
                    .create_dir_all(parent)
                    .await
                    .map_err(|e| OperationError::io(format!("create directory {}", parent.display()), e))?;
            }
            self.fs
                .write(path.as_path(), request.new_content.as_bytes())
                .await
                .map_err(|e| OperationError::io(format!("write {path}"), e))?;
            Ok(OperationResponse::file_ok(path.to_string()))
        })
        .await
    }

    /// Delete an existing file
    pub async fn delete_file(&self, owner_id: Option<&str>, request: &DeleteFileRequest) -> OperationResponse {
        let path = match SafePath::parse(&request.file_path) {
            Ok(path) => path,
            Err(e) => return Self::rejected(FsVerb::DeleteFile, e),
        };

        self.relayed(owner_id, FsVerb::DeleteFile, request, async {
            if !self.exists(&path).await? {
                return Err(OperationError::NotFound(format!("File does not exist: {path}")));
            }
            self.fs
                .remove_file(path.as_path())
                .await
                .map_err(|e| OperationError::io(format!("delete {path}"), e))?;
            Ok(OperationResponse::file_ok(path.to_string()))
        })
        .await
    }

    /// Create a new folder and any missing parents
    pub async fn create_folder(&self, owner_id: Option<&str>, request: &CreateFolderRequest) -> OperationResponse {
        let path = match SafePath::parse(&request.folder_path) {
            Ok(path) => path,
            Err(e) => return Self::rejected(FsVerb::CreateFolder, e),
        };

        self.relayed(owner_id, FsVerb::CreateFolder, request, async {
            let conflict = || OperationError::Conflict(format!("Folder already exists: {path}"));
            if self.exists(&path).await? {
                return Err(conflict());
            }
            if let Some(parent) = path.parent() {
                self.fs
                    .create_dir_all(parent)
                    .await
                    .map_err(|e| OperationError::io(format!("create directory {}", parent.display()), e))?;
            }
            self.fs
                .create_dir(path.as_path())
                .await
                .map_err(|e| match e.kind() {
                    io::ErrorKind::AlreadyExists => conflict(),
                    _ => OperationError::io(format!("create directory {path}"), e),
                })?;
            Ok(OperationResponse::folder_ok(path.to_string()))
        })
        .await
    }

    /// Delete a folder and everything below it
    pub async fn delete_folder(&self, owner_id: Option<&str>, request: &DeleteFolderRequest) -> OperationResponse {
        let path = match SafePath::parse(&request.folder_path) {
            Ok(path) => path,
            Err(e) => return Self::rejected(FsVerb::DeleteFolder, e),
        };

        self.relayed(owner_id, FsVerb::DeleteFolder, request, async {
            if !self.exists(&path).await? {
                return Err(OperationError::NotFound(format!("Folder does not exist: {path}")));
            }
            self.fs
                .remove_dir_all(path.as_path())
                .await
                .map_err(|e| OperationError::io(format!("delete directory {path}"), e))?;
            Ok(OperationResponse::folder_ok(path.to_string()))
        })
        .await
    }

    /// List a directory, entries sorted by name
    pub async fn list_directory(&self, owner_id: Option<&str>, request: &ListDirectoryRequest) -> OperationResponse {
        let path = match SafePath::parse(&request.dir_path) {
            Ok(path) => path,
            Err(e) => return Self::rejected(FsVerb::ListDirectory, e),
        };

        self.relayed(owner_id, FsVerb::ListDirectory, request, async {
            if !self.exists(&path).await? {
                return Err(OperationError::NotFound(format!("Directory does not exist: {path}")));
            }
            let mut entries = self
                .fs
                .read_dir(path.as_path())
                .await
                .map_err(|e| OperationError::io(format!("list {path}"), e))?;
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(OperationResponse::folder_ok(path.to_string()).with_entries(entries))
        })
        .await
    }

    async fn exists(&self, path: &SafePath) -> Result<bool, OperationError> {
        self.fs
            .exists(path.as_path())
            .await
            .map_err(|e| OperationError::io(format!("stat {path}"), e))
    }

    fn rejected(verb: FsVerb, error: PathError) -> OperationResponse {
        tracing::debug!(%verb, error = %error, "operation rejected by path validation");
        OperationError::Validation(error).to_response()
    }

    /// Run `operation` between the request and result notifications
    async fn relayed<R, F>(&self, owner_id: Option<&str>, verb: FsVerb, request: &R, operation: F) -> OperationResponse
    where
        R: Serialize + Sync,
        F: Future<Output = Result<OperationResponse, OperationError>>,
    {
        let data = serde_json::to_value(request).unwrap_or_default();
        let ticket = self.relay.notify_request(owner_id, verb, data);

        match operation.await {
            Ok(response) => {
                let content = serde_json::to_value(&response).unwrap_or_default();
                self.relay.notify_response(&ticket, content, false);
                response
            }
            Err(error) => {
                let response = error.to_response();
                if error.emits_result_notification() {
                    tracing::warn!(%verb, error = %error, "operation failed");
                    let content = serde_json::to_value(&response).unwrap_or_default();
                    self.relay.notify_response(&ticket, content, true);
                } else {
                    tracing::debug!(%verb, error = %error, "operation precondition failed");
                }
                response
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;
    use bridge_protocol::FailureKind;
    use bridge_registry::ConnectionRegistry;
    use proptest::prelude::*;

    fn untouchable() -> FileOperations {
        // No expectations: any filesystem call panics.
        let relay = NotificationRelay::new(ConnectionRegistry::init(8));
        FileOperations::with_file_system(relay, Arc::new(MockFileSystem::new()))
            .with_project_root(SafePath::parse("/tmp/proj").unwrap())
    }

    fn block_on<F: Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[tokio::test]
    async fn traversal_in_write_is_rejected_without_touching_disk() {
        let ops = untouchable();
        let response = ops
            .write_to_file(
                None,
                &WriteToFileRequest {
                    rel_path: "../../etc/passwd".into(),
                    new_content: "x".into(),
                },
            )
            .await;

        assert!(!response.success);
        assert_eq!(response.error_kind, Some(FailureKind::Validation));
    }

    #[tokio::test]
    async fn write_without_project_root_is_rejected() {
        let relay = NotificationRelay::new(ConnectionRegistry::init(8));
        let ops = FileOperations::with_file_system(relay, Arc::new(MockFileSystem::new()));
        let response = ops
            .write_to_file(
                None,
                &WriteToFileRequest {
                    rel_path: "a.txt".into(),
                    new_content: "x".into(),
                },
            )
            .await;
        assert_eq!(response.error_kind, Some(FailureKind::Validation));
    }

    #[tokio::test]
    async fn io_failure_is_reported() {
        let mut fs = MockFileSystem::new();
        fs.expect_exists().returning(|_| Ok(true));
        fs.expect_read_to_string()
            .returning(|_| Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "not utf-8")));
        let relay = NotificationRelay::new(ConnectionRegistry::init(8));
        let ops = FileOperations::with_file_system(relay, Arc::new(fs));

        let response = ops
            .read_file(None, &ReadFileRequest { file_path: "/tmp/proj/bin".into() })
            .await;

        assert_eq!(response.error_kind, Some(FailureKind::Io));
        assert!(response.error.unwrap().contains("not utf-8"));
    }

    #[tokio::test]
    async fn create_losing_a_race_after_the_check_is_a_conflict() {
        let mut fs = MockFileSystem::new();
        fs.expect_exists().returning(|_| Ok(false));
        fs.expect_create_dir_all().returning(|_| Ok(()));
        fs.expect_create_new()
            .times(1)
            .returning(|_, _| Err(std::io::Error::from(std::io::ErrorKind::AlreadyExists)));
        fs.expect_write().never();
        fs.expect_create_dir()
            .times(1)
            .returning(|_| Err(std::io::Error::from(std::io::ErrorKind::AlreadyExists)));
        let relay = NotificationRelay::new(ConnectionRegistry::init(8));
        let ops = FileOperations::with_file_system(relay, Arc::new(fs));

        let file = ops
            .create_file(
                None,
                &CreateFileRequest {
                    file_name: "a.txt".into(),
                    file_path: "/tmp/proj/a.txt".into(),
                    source: "hi".into(),
                },
            )
            .await;
        assert_eq!(file.error_kind, Some(FailureKind::Conflict));
        assert_eq!(file.error.as_deref(), Some("File already exists: /tmp/proj/a.txt"));

        let folder = ops
            .create_folder(
                None,
                &CreateFolderRequest {
                    folder_name: "src".into(),
                    folder_path: "/tmp/proj/src".into(),
                },
            )
            .await;
        assert_eq!(folder.error_kind, Some(FailureKind::Conflict));
        assert_eq!(folder.error.as_deref(), Some("Folder already exists: /tmp/proj/src"));
    }

    fn bad_path() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z]{1,8}(/[a-z]{1,8}){0,3}",
            "(/[a-z]{1,8}){0,2}/\\.\\.(/[a-z]{1,8}){0,2}",
            Just(String::new()),
        ]
    }

    proptest! {
        /// Relative or `..` paths never reach the filesystem, for any verb
        #[test]
        fn invalid_paths_make_zero_filesystem_calls(path in bad_path()) {
            let ops = untouchable();
            let responses = block_on(async {
                vec![
                    ops.create_file(None, &CreateFileRequest {
                        file_name: "a".into(), file_path: path.clone(), source: String::new(),
                    }).await,
                    ops.read_file(None, &ReadFileRequest { file_path: path.clone() }).await,
                    ops.delete_file(None, &DeleteFileRequest {
                        filename: "a".into(), file_path: path.clone(),
                    }).await,
                    ops.create_folder(None, &CreateFolderRequest {
                        folder_name: "a".into(), folder_path: path.clone(),
                    }).await,
                    ops.delete_folder(None, &DeleteFolderRequest {
                        folder_name: None, folder_path: path.clone(),
                    }).await,
                    ops.list_directory(None, &ListDirectoryRequest { dir_path: path.clone() }).await,
                ]
            });

            for response in responses {
                prop_assert!(!response.success);
                prop_assert_eq!(response.error_kind, Some(FailureKind::Validation));
            }
        }
    }
}
