//! Remote operations as values
//!
//! An `Operation` carries everything needed to perform one remote call, so the
//! dispatcher can derive its cache key, retry it, and hand it to the executor
//! without knowing which call it is. Each operation also knows which cache
//! entries its success makes unreliable.
//!
//! | Operation | Cache key (category) | Effect on success |
//! |---|---|---|
//! | find_folder_by_name | `folder:{name}:{parent}` (folder_id) | stored |
//! | list_children | `children:{folder}` (listing) | stored |
//! | get_metadata | `meta:{id}` (metadata) | stored |
//! | read_range | `range:{sheet}:{range}` (range) | stored |
//! | create_folder | | sets `folder:{name}:{parent}`, drops `children:{parent}` and `meta:{parent}` |
//! | upload_blob, create_spreadsheet, create_document | | drops `children:{parent}` and `meta:{parent}` |
//! | delete_file | | drops keys containing `{id}`, all listings, folder lookups resolving to `{id}` |
//! | create_shareable_link | | drops `meta:{id}` |
//! | write/append/clear range, batch_update | | drops keys containing `range:{sheet}:` |
//! | create_sheet_tab | | drops `range:{sheet}:` keys and `meta:{sheet}` |

use remote::{CellMatrix, FileMetadata};
use serde::Serialize;

use crate::cache::{CacheCategory, Invalidation};
use crate::error::{Error, Result};

/// One remote call with owned arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    CreateFolder {
        name: String,
        parent_id: String,
    },
    FindFolderByName {
        name: String,
        parent_id: String,
    },
    UploadBlob {
        bytes: Vec<u8>,
        filename: String,
        mime_type: String,
        parent_id: String,
    },
    ListChildren {
        folder_id: String,
    },
    GetMetadata {
        id: String,
    },
    DeleteFile {
        id: String,
    },
    CreateShareableLink {
        id: String,
    },
    ReadRange {
        sheet_id: String,
        range: String,
    },
    WriteRange {
        sheet_id: String,
        range: String,
        values: CellMatrix,
    },
    AppendRange {
        sheet_id: String,
        range: String,
        values: CellMatrix,
    },
    ClearRange {
        sheet_id: String,
        range: String,
    },
    BatchUpdate {
        sheet_id: String,
        requests: Vec<serde_json::Value>,
    },
    CreateSpreadsheet {
        title: String,
        parent_id: String,
    },
    CreateSheetTab {
        sheet_id: String,
        name: String,
    },
    CreateDocument {
        title: String,
        content: String,
        parent_id: String,
    },
}

/// Cache change a successful operation requires.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEffect {
    Invalidate(Invalidation),
    /// Drop folder lookups whose cached id is this one.
    ForgetFolder(String),
    Store {
        key: String,
        value: Outcome,
        category: CacheCategory,
    },
}

pub fn folder_key(name: &str, parent_id: &str) -> String {
    format!("folder:{name}:{parent_id}")
}

pub fn children_key(folder_id: &str) -> String {
    format!("children:{folder_id}")
}

pub fn metadata_key(id: &str) -> String {
    format!("meta:{id}")
}

pub fn range_key(sheet_id: &str, range: &str) -> String {
    format!("range:{sheet_id}:{range}")
}

fn range_prefix(sheet_id: &str) -> String {
    format!("range:{sheet_id}:")
}

impl Operation {
    /// Stable name, used in logs, metrics and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateFolder { .. } => "create_folder",
            Operation::FindFolderByName { .. } => "find_folder_by_name",
            Operation::UploadBlob { .. } => "upload_blob",
            Operation::ListChildren { .. } => "list_children",
            Operation::GetMetadata { .. } => "get_metadata",
            Operation::DeleteFile { .. } => "delete_file",
            Operation::CreateShareableLink { .. } => "create_shareable_link",
            Operation::ReadRange { .. } => "read_range",
            Operation::WriteRange { .. } => "write_range",
            Operation::AppendRange { .. } => "append_range",
            Operation::ClearRange { .. } => "clear_range",
            Operation::BatchUpdate { .. } => "batch_update",
            Operation::CreateSpreadsheet { .. } => "create_spreadsheet",
            Operation::CreateSheetTab { .. } => "create_sheet_tab",
            Operation::CreateDocument { .. } => "create_document",
        }
    }

    /// Cache key and category for pure reads; `None` for mutations.
    pub fn cache_key(&self) -> Option<(String, CacheCategory)> {
        match self {
            Operation::FindFolderByName { name, parent_id } => {
                Some((folder_key(name, parent_id), CacheCategory::FolderId))
            }
            Operation::ListChildren { folder_id } => Some((children_key(folder_id), CacheCategory::Listing)),
            Operation::GetMetadata { id } => Some((metadata_key(id), CacheCategory::Metadata)),
            Operation::ReadRange { sheet_id, range } => Some((range_key(sheet_id, range), CacheCategory::Range)),
            _ => None,
        }
    }

    pub fn is_read(&self) -> bool {
        self.cache_key().is_some()
    }

    /// Creates eligible for the post-create ownership transfer.
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Operation::CreateFolder { .. }
                | Operation::UploadBlob { .. }
                | Operation::CreateSpreadsheet { .. }
                | Operation::CreateDocument { .. }
        )
    }

    /// Result to report when the remote says the target does not exist.
    ///
    /// `None` means absence is an error for this operation.
    pub fn empty_outcome(&self) -> Option<Outcome> {
        match self {
            Operation::FindFolderByName { .. } => Some(Outcome::MaybeId(None)),
            Operation::ListChildren { .. } => Some(Outcome::Files(Vec::new())),
            Operation::GetMetadata { .. } => Some(Outcome::File(None)),
            Operation::ReadRange { .. } => Some(Outcome::Values(Vec::new())),
            Operation::DeleteFile { .. } => Some(Outcome::Deleted(false)),
            _ => None,
        }
    }

    /// Cache changes to apply once this operation has succeeded with `outcome`.
    pub fn cache_effects(&self, outcome: &Outcome) -> Vec<CacheEffect> {
        match self {
            Operation::CreateFolder { name, parent_id } => {
                let mut effects = parent_changed(parent_id);
                if let Outcome::Created(created) = outcome {
                    effects.push(CacheEffect::Store {
                        key: folder_key(name, parent_id),
                        value: Outcome::MaybeId(Some(created.id.clone())),
                        category: CacheCategory::FolderId,
                    });
                }
                effects
            }
            Operation::UploadBlob { parent_id, .. }
            | Operation::CreateSpreadsheet { parent_id, .. }
            | Operation::CreateDocument { parent_id, .. } => parent_changed(parent_id),
            Operation::DeleteFile { id } => vec![
                CacheEffect::Invalidate(Invalidation::pattern(id.as_str())),
                CacheEffect::Invalidate(Invalidation::pattern("children:")),
                CacheEffect::ForgetFolder(id.clone()),
            ],
            Operation::CreateShareableLink { id } => {
                vec![CacheEffect::Invalidate(Invalidation::exact(metadata_key(id)))]
            }
            Operation::WriteRange { sheet_id, .. }
            | Operation::AppendRange { sheet_id, .. }
            | Operation::ClearRange { sheet_id, .. }
            | Operation::BatchUpdate { sheet_id, .. } => {
                vec![CacheEffect::Invalidate(Invalidation::pattern(range_prefix(sheet_id)))]
            }
            Operation::CreateSheetTab { sheet_id, .. } => vec![
                CacheEffect::Invalidate(Invalidation::pattern(range_prefix(sheet_id))),
                CacheEffect::Invalidate(Invalidation::exact(metadata_key(sheet_id))),
            ],
            Operation::FindFolderByName { .. }
            | Operation::ListChildren { .. }
            | Operation::GetMetadata { .. }
            | Operation::ReadRange { .. } => Vec::new(),
        }
    }
}

/// A new child changes both the parent's listing and its own metadata.
fn parent_changed(parent_id: &str) -> Vec<CacheEffect> {
    vec![
        CacheEffect::Invalidate(Invalidation::exact(children_key(parent_id))),
        CacheEffect::Invalidate(Invalidation::exact(metadata_key(parent_id))),
    ]
}

/// Result of a create, with the outcome of the optional ownership transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Created {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Whether ownership moved to the configured owner. Always false when no
    /// owner is configured.
    pub transferred: bool,
}

impl Created {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: None,
            transferred: false,
        }
    }
}

/// Value produced by one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    MaybeId(Option<String>),
    Files(Vec<FileMetadata>),
    File(Option<FileMetadata>),
    Deleted(bool),
    Link(String),
    Values(CellMatrix),
    Done,
    Created(Created),
    Tab(i64),
}

impl Outcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::MaybeId(_) => "id",
            Outcome::Files(_) => "listing",
            Outcome::File(_) => "metadata",
            Outcome::Deleted(_) => "deleted",
            Outcome::Link(_) => "link",
            Outcome::Values(_) => "values",
            Outcome::Done => "done",
            Outcome::Created(_) => "created",
            Outcome::Tab(_) => "tab",
        }
    }

    /// Absence is never cached: a resource created moments later through
    /// another path must be visible on the next read.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, Outcome::MaybeId(None) | Outcome::File(None))
    }

    /// Whether this cached value resolves to `id`.
    pub fn refers_to(&self, id: &str) -> bool {
        match self {
            Outcome::MaybeId(Some(found)) => found == id,
            Outcome::File(Some(meta)) => meta.id == id,
            _ => false,
        }
    }

    fn unexpected(self, operation: &'static str) -> Error {
        Error::UnexpectedOutcome {
            operation,
            got: self.kind(),
        }
    }

    pub fn into_maybe_id(self, operation: &'static str) -> Result<Option<String>> {
        match self {
            Outcome::MaybeId(id) => Ok(id),
            other => Err(other.unexpected(operation)),
        }
    }

    pub fn into_files(self, operation: &'static str) -> Result<Vec<FileMetadata>> {
        match self {
            Outcome::Files(files) => Ok(files),
            other => Err(other.unexpected(operation)),
        }
    }

    pub fn into_file(self, operation: &'static str) -> Result<Option<FileMetadata>> {
        match self {
            Outcome::File(meta) => Ok(meta),
            other => Err(other.unexpected(operation)),
        }
    }

    pub fn into_deleted(self, operation: &'static str) -> Result<bool> {
        match self {
            Outcome::Deleted(deleted) => Ok(deleted),
            other => Err(other.unexpected(operation)),
        }
    }

    pub fn into_link(self, operation: &'static str) -> Result<String> {
        match self {
            Outcome::Link(url) => Ok(url),
            other => Err(other.unexpected(operation)),
        }
    }

    pub fn into_values(self, operation: &'static str) -> Result<CellMatrix> {
        match self {
            Outcome::Values(values) => Ok(values),
            other => Err(other.unexpected(operation)),
        }
    }

    pub fn into_done(self, operation: &'static str) -> Result<()> {
        match self {
            Outcome::Done => Ok(()),
            other => Err(other.unexpected(operation)),
        }
    }

    pub fn into_created(self, operation: &'static str) -> Result<Created> {
        match self {
            Outcome::Created(created) => Ok(created),
            other => Err(other.unexpected(operation)),
        }
    }

    pub fn into_tab(self, operation: &'static str) -> Result<i64> {
        match self {
            Outcome::Tab(tab) => Ok(tab),
            other => Err(other.unexpected(operation)),
        }
    }
}
