//! Remote workspace API abstraction
//!
//! Defines the `RemoteApi` trait: the file storage, spreadsheet and document
//! operations the client pool wraps. One `RemoteApi` value is one live handle
//! bound to exactly one credential. The wire protocol is left to implementers;
//! `classify_status` maps HTTP-style failures onto `RemoteError` for those that
//! speak HTTP. `MemoryBackend` is a complete in-process implementation used for
//! local runs and tests.

pub mod classify;
pub mod memory;

pub use classify::classify_status;
pub use memory::{MemoryBackend, MemoryRemote};

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Rows of cell values, as read from or written to a spreadsheet range.
pub type CellMatrix = Vec<Vec<serde_json::Value>>;

/// Boxed future returned by every remote operation.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// MIME type the remote uses to mark a folder.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.workspace.folder";

/// Metadata of a remote file or folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl FileMetadata {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

/// A freshly created spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadsheetRef {
    pub id: String,
    pub url: String,
}

/// Failures reported by a remote handle.
///
/// The client pool maps each variant onto its own taxonomy: `Auth` marks the
/// credential unhealthy, `QuotaExceeded` and `Network`/`Timeout` are retried,
/// `NotFound` becomes an empty result for reads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("credential rejected: {0}")]
    Auth(String),

    #[error("remote quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("remote call timed out")]
    Timeout,

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteError::Auth(_) => "auth",
            RemoteError::QuotaExceeded(_) => "quota_exceeded",
            RemoteError::NotFound(_) => "not_found",
            RemoteError::PermissionDenied(_) => "permission_denied",
            RemoteError::Network(_) => "network",
            RemoteError::Timeout => "timeout",
            RemoteError::Rejected(_) => "rejected",
        }
    }
}

/// Result alias for remote operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// One live connection to the remote workspace API.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn RemoteApi>`). Implementations perform exactly one remote call per
/// method and never retry internally; retry policy belongs to the pool.
pub trait RemoteApi: Send + Sync {
    fn create_folder<'a>(&'a self, name: &'a str, parent_id: &'a str) -> RemoteFuture<'a, String>;

    fn find_folder_by_name<'a>(
        &'a self,
        name: &'a str,
        parent_id: &'a str,
    ) -> RemoteFuture<'a, Option<String>>;

    fn upload_blob<'a>(
        &'a self,
        bytes: &'a [u8],
        filename: &'a str,
        mime_type: &'a str,
        parent_id: &'a str,
    ) -> RemoteFuture<'a, String>;

    fn list_children<'a>(&'a self, folder_id: &'a str) -> RemoteFuture<'a, Vec<FileMetadata>>;

    fn get_metadata<'a>(&'a self, id: &'a str) -> RemoteFuture<'a, Option<FileMetadata>>;

    fn delete_file<'a>(&'a self, id: &'a str) -> RemoteFuture<'a, bool>;

    fn create_shareable_link<'a>(&'a self, id: &'a str) -> RemoteFuture<'a, String>;

    fn read_range<'a>(&'a self, sheet_id: &'a str, range: &'a str) -> RemoteFuture<'a, CellMatrix>;

    fn write_range<'a>(
        &'a self,
        sheet_id: &'a str,
        range: &'a str,
        values: &'a CellMatrix,
    ) -> RemoteFuture<'a, ()>;

    fn append_range<'a>(
        &'a self,
        sheet_id: &'a str,
        range: &'a str,
        values: &'a CellMatrix,
    ) -> RemoteFuture<'a, ()>;

    fn clear_range<'a>(&'a self, sheet_id: &'a str, range: &'a str) -> RemoteFuture<'a, ()>;

    /// Apply formatting/structural requests to a spreadsheet in one call.
    fn batch_update<'a>(
        &'a self,
        sheet_id: &'a str,
        requests: &'a [serde_json::Value],
    ) -> RemoteFuture<'a, ()>;

    fn create_spreadsheet<'a>(
        &'a self,
        title: &'a str,
        parent_id: &'a str,
    ) -> RemoteFuture<'a, SpreadsheetRef>;

    fn create_sheet_tab<'a>(&'a self, sheet_id: &'a str, name: &'a str) -> RemoteFuture<'a, i64>;

    fn create_document<'a>(
        &'a self,
        title: &'a str,
        content: &'a str,
        parent_id: &'a str,
    ) -> RemoteFuture<'a, String>;

    /// Hand ownership of a created file to another account.
    fn transfer_ownership<'a>(&'a self, id: &'a str, new_owner: &'a str) -> RemoteFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_are_stable_labels() {
        assert_eq!(RemoteError::Auth("x".into()).kind(), "auth");
        assert_eq!(RemoteError::QuotaExceeded("x".into()).kind(), "quota_exceeded");
        assert_eq!(RemoteError::Timeout.kind(), "timeout");
        assert_eq!(RemoteError::Rejected("x".into()).kind(), "rejected");
    }

    #[test]
    fn metadata_omits_absent_optional_fields() {
        let json = r#"{"id":"f1","name":"Gallery","mime_type":"application/vnd.workspace.folder"}"#;
        let meta: FileMetadata = serde_json::from_str(json).unwrap();
        assert!(meta.is_folder());
        assert!(meta.parents.is_empty());
        let out = serde_json::to_string(&meta).unwrap();
        assert!(!out.contains("web_link"), "got: {out}");
    }
}
