//! File and folder operation payloads
//!
//! One request struct per verb, a single [`OperationResponse`] shape shared by
//! every `<verb>Response`, and the diff-relay payloads.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// File-system verbs relayed through the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsVerb {
    /// Create a new file
    CreateFile,
    /// Read an existing file
    ReadFile,
    /// Overwrite (or create) a file by project-relative path
    WriteToFile,
    /// Delete an existing file
    DeleteFile,
    /// Create a new folder
    CreateFolder,
    /// Recursively delete an existing folder
    DeleteFolder,
    /// List a directory
    ListDirectory,
}

impl FsVerb {
    /// Every verb, in a stable order
    pub const ALL: [FsVerb; 7] = [
        Self::CreateFile,
        Self::ReadFile,
        Self::WriteToFile,
        Self::DeleteFile,
        Self::CreateFolder,
        Self::DeleteFolder,
        Self::ListDirectory,
    ];

    /// Wire name of the verb (also the request message `type`)
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateFile => "createFile",
            Self::ReadFile => "readFile",
            Self::WriteToFile => "writeToFile",
            Self::DeleteFile => "deleteFile",
            Self::CreateFolder => "createFolder",
            Self::DeleteFolder => "deleteFolder",
            Self::ListDirectory => "listDirectory",
        }
    }

    /// Message `type` of the correlated response
    #[inline]
    #[must_use]
    pub fn response_type(self) -> &'static str {
        match self {
            Self::CreateFile => "createFileResponse",
            Self::ReadFile => "readFileResponse",
            Self::WriteToFile => "writeToFileResponse",
            Self::DeleteFile => "deleteFileResponse",
            Self::CreateFolder => "createFolderResponse",
            Self::DeleteFolder => "deleteFolderResponse",
            Self::ListDirectory => "listDirectoryResponse",
        }
    }
}

impl fmt::Display for FsVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FsVerb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|verb| verb.as_str() == s)
            .ok_or_else(|| format!("unknown verb: {s}"))
    }
}

/// `createFile` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileRequest {
    /// Display name of the file
    pub file_name: String,
    /// Absolute target path
    pub file_path: String,
    /// Initial contents
    #[serde(default)]
    pub source: String,
}

/// `readFile` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadFileRequest {
    /// Absolute path to read
    pub file_path: String,
}

/// `writeToFile` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteToFileRequest {
    /// Path relative to the project root (absolute paths are accepted as-is)
    pub rel_path: String,
    /// Replacement contents
    pub new_content: String,
}

/// `deleteFile` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFileRequest {
    /// Display name of the file
    #[serde(default)]
    pub filename: String,
    /// Absolute path to delete
    pub file_path: String,
}

/// `createFolder` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderRequest {
    /// Display name of the folder
    #[serde(default)]
    pub folder_name: String,
    /// Absolute target path
    pub folder_path: String,
}

/// `deleteFolder` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFolderRequest {
    /// Display name of the folder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_name: Option<String>,
    /// Absolute path to delete
    pub folder_path: String,
}

/// `listDirectory` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDirectoryRequest {
    /// Absolute directory path
    pub dir_path: String,
}

/// Structured failure classification carried in error responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// Bad path or arguments; never retried
    Validation,
    /// Target already exists
    Conflict,
    /// Target does not exist
    NotFound,
    /// Filesystem failure while executing
    Io,
    /// Environment backend hook failed
    Backend,
}

/// One directory entry in a `listDirectoryResponse`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    /// File or folder name
    pub name: String,
    /// Absolute path
    pub path: String,
    /// Whether the entry is a directory
    pub is_directory: bool,
}

/// Response shared by every file/folder verb
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    /// Whether the operation succeeded
    pub success: bool,
    /// Path the operation acted on (file verbs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Path the operation acted on (folder verbs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,
    /// File contents (`readFile`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Directory entries (`listDirectory`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<DirEntry>>,
    /// Human-readable error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Structured error classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
}

impl OperationResponse {
    /// Successful file operation
    #[inline]
    #[must_use]
    pub fn file_ok(path: impl Into<String>) -> Self {
        Self {
            success: true,
            file_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Successful folder operation
    #[inline]
    #[must_use]
    pub fn folder_ok(path: impl Into<String>) -> Self {
        Self {
            success: true,
            folder_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Failed operation
    #[inline]
    #[must_use]
    pub fn failure(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            error_kind: Some(kind),
            ..Self::default()
        }
    }

    /// Attach file contents
    #[inline]
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Attach directory entries
    #[inline]
    #[must_use]
    pub fn with_entries(mut self, entries: Vec<DirEntry>) -> Self {
        self.entries = Some(entries);
        self
    }
}

/// One changed file reported by an environment backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffFile {
    /// Path relative to the project root
    pub path: String,
    /// Change status (`added`, `modified`, `deleted`, ...)
    pub status: String,
    /// Unified diff text, when the backend provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// Result of the backend `getDiffFiles` hook
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffFiles {
    /// Changed files
    pub files: Vec<DiffFile>,
    /// Whether anything changed
    pub has_changes: bool,
}

/// `getDiffFilesResponse` payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffFilesResponse {
    /// Whether the hook succeeded
    pub success: bool,
    /// Changed files
    #[serde(default)]
    pub files: Vec<DiffFile>,
    /// Whether anything changed
    #[serde(default)]
    pub has_changes: bool,
    /// Hook failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<DiffFiles> for DiffFilesResponse {
    fn from(value: DiffFiles) -> Self {
        Self {
            success: true,
            files: value.files,
            has_changes: value.has_changes,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn verb_round_trips_through_str() {
        for verb in FsVerb::ALL {
            assert_eq!(verb.as_str().parse::<FsVerb>().unwrap(), verb);
        }
        assert!("renameFile".parse::<FsVerb>().is_err());
    }

    #[test]
    fn success_response_omits_empty_fields() {
        let json = serde_json::to_value(OperationResponse::file_ok("/tmp/proj/a.txt")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "success": true, "filePath": "/tmp/proj/a.txt" })
        );
    }

    #[test]
    fn failure_response_carries_kind() {
        let json = serde_json::to_value(OperationResponse::failure(
            FailureKind::NotFound,
            "File does not exist: /x",
        ))
        .unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["errorKind"], "notFound");
    }

    #[test]
    fn delete_file_accepts_lowercase_filename() {
        let req: DeleteFileRequest = serde_json::from_value(serde_json::json!({
            "filename": "missing.txt",
            "filePath": "/tmp/proj/missing.txt"
        }))
        .unwrap();
        assert_eq!(req.filename, "missing.txt");
    }
}
