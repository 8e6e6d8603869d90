//! In-memory workspace backend
//!
//! `MemoryBackend` holds one shared file tree, spreadsheet store and document
//! store. Each `MemoryRemote` is a handle onto it, tagged with the credential
//! index it was built for, so every call is attributed to a handle in the call
//! log. Failures can be scripted per handle with `fail_next`, which is how pool
//! tests simulate rejected credentials, quota rejections and network errors.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::{
    CellMatrix, FOLDER_MIME_TYPE, FileMetadata, RemoteApi, RemoteError, RemoteFuture, Result,
    SpreadsheetRef,
};

/// Id of the implicit top-level folder.
pub const ROOT_FOLDER_ID: &str = "root";

const SPREADSHEET_MIME_TYPE: &str = "application/vnd.workspace.spreadsheet";
const DOCUMENT_MIME_TYPE: &str = "application/vnd.workspace.document";
const LINK_BASE: &str = "https://workspace.invalid";

/// One remote call as seen by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub handle: usize,
    pub operation: &'static str,
}

struct Tab {
    id: i64,
    name: String,
    rows: CellMatrix,
}

struct Spreadsheet {
    next_tab_id: i64,
    tabs: Vec<Tab>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    files: HashMap<String, FileMetadata>,
    sheets: HashMap<String, Spreadsheet>,
    documents: HashMap<String, String>,
    faults: HashMap<usize, VecDeque<RemoteError>>,
    deny_transfers: bool,
    latency: Duration,
    calls: Vec<CallRecord>,
}

impl State {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("mem-{}", self.next_id)
    }

    fn require_folder(&self, id: &str) -> Result<()> {
        if id == ROOT_FOLDER_ID {
            return Ok(());
        }
        match self.files.get(id) {
            Some(meta) if meta.is_folder() => Ok(()),
            Some(_) => Err(RemoteError::Rejected(format!("{id} is not a folder"))),
            None => Err(RemoteError::NotFound(format!("folder {id}"))),
        }
    }

    fn insert_file(&mut self, name: &str, mime_type: &str, parent_id: &str, size: Option<u64>) -> String {
        let id = self.allocate_id();
        self.files.insert(
            id.clone(),
            FileMetadata {
                id: id.clone(),
                name: name.to_string(),
                mime_type: mime_type.to_string(),
                parents: vec![parent_id.to_string()],
                size,
                web_link: None,
                owner: None,
            },
        );
        id
    }

    fn tab_mut(&mut self, sheet_id: &str, tab: Option<&str>) -> Result<&mut Tab> {
        let sheet = self
            .sheets
            .get_mut(sheet_id)
            .ok_or_else(|| RemoteError::NotFound(format!("spreadsheet {sheet_id}")))?;
        match tab {
            Some(name) => sheet
                .tabs
                .iter_mut()
                .find(|t| t.name == name)
                .ok_or_else(|| RemoteError::Rejected(format!("unknown tab {name}"))),
            None => sheet
                .tabs
                .first_mut()
                .ok_or_else(|| RemoteError::Rejected(format!("spreadsheet {sheet_id} has no tabs"))),
        }
    }
}

/// Shared in-memory workspace. Create handles with [`MemoryBackend::handle`].
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A handle attributed to credential `index`.
    pub fn handle(self: &Arc<Self>, index: usize) -> MemoryRemote {
        MemoryRemote {
            index,
            backend: Arc::clone(self),
        }
    }

    /// Make the next call on handle `index` fail with `error`. Queued failures
    /// are consumed in order, one per call.
    pub fn fail_next(&self, index: usize, error: RemoteError) {
        self.lock().faults.entry(index).or_default().push_back(error);
    }

    /// Reject every ownership transfer with `PermissionDenied`.
    pub fn deny_transfers(&self, deny: bool) {
        self.lock().deny_transfers = deny;
    }

    /// Delay every response by `latency`, measured on tokio's clock.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Create a folder directly, without recording a remote call.
    pub fn seed_folder(&self, name: &str, parent_id: &str) -> String {
        self.lock().insert_file(name, FOLDER_MIME_TYPE, parent_id, None)
    }

    /// Number of recorded calls of `operation` across all handles.
    pub fn calls(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Number of recorded calls made through handle `index`.
    pub fn calls_on(&self, index: usize) -> usize {
        self.lock().calls.iter().filter(|c| c.handle == index).count()
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn call_log(&self) -> Vec<CallRecord> {
        self.lock().calls.clone()
    }

    /// Owner recorded by a successful ownership transfer.
    pub fn owner_of(&self, id: &str) -> Option<String> {
        self.lock().files.get(id).and_then(|f| f.owner.clone())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call and surface any scripted failure for this handle.
    fn begin(&self, handle: usize, operation: &'static str) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push(CallRecord { handle, operation });
        if let Some(error) = state.faults.get_mut(&handle).and_then(VecDeque::pop_front) {
            debug!(handle, operation, error = %error, "injected failure");
            return Err(error);
        }
        Ok(state)
    }
}

/// A handle onto a [`MemoryBackend`].
pub struct MemoryRemote {
    index: usize,
    backend: Arc<MemoryBackend>,
}

impl MemoryRemote {
    pub fn index(&self) -> usize {
        self.index
    }

    fn respond<'a, T: Send + 'a>(&self, result: Result<T>) -> RemoteFuture<'a, T> {
        let latency = self.backend.lock().latency;
        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            result
        })
    }

    fn create_folder_now(&self, name: &str, parent_id: &str) -> Result<String> {
        let mut state = self.backend.begin(self.index, "create_folder")?;
        state.require_folder(parent_id)?;
        Ok(state.insert_file(name, FOLDER_MIME_TYPE, parent_id, None))
    }

    fn find_folder_now(&self, name: &str, parent_id: &str) -> Result<Option<String>> {
        let state = self.backend.begin(self.index, "find_folder_by_name")?;
        state.require_folder(parent_id)?;
        let mut matches: Vec<&FileMetadata> = state
            .files
            .values()
            .filter(|f| f.is_folder() && f.name == name && f.parents.iter().any(|p| p == parent_id))
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches.first().map(|f| f.id.clone()))
    }

    fn upload_now(&self, bytes: &[u8], filename: &str, mime_type: &str, parent_id: &str) -> Result<String> {
        let mut state = self.backend.begin(self.index, "upload_blob")?;
        state.require_folder(parent_id)?;
        Ok(state.insert_file(filename, mime_type, parent_id, Some(bytes.len() as u64)))
    }

    fn list_now(&self, folder_id: &str) -> Result<Vec<FileMetadata>> {
        let state = self.backend.begin(self.index, "list_children")?;
        state.require_folder(folder_id)?;
        let mut children: Vec<FileMetadata> = state
            .files
            .values()
            .filter(|f| f.parents.iter().any(|p| p == folder_id))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(children)
    }

    fn metadata_now(&self, id: &str) -> Result<Option<FileMetadata>> {
        let state = self.backend.begin(self.index, "get_metadata")?;
        Ok(state.files.get(id).cloned())
    }

    fn delete_now(&self, id: &str) -> Result<bool> {
        let mut state = self.backend.begin(self.index, "delete_file")?;
        let removed = state.files.remove(id).is_some();
        state.sheets.remove(id);
        state.documents.remove(id);
        Ok(removed)
    }

    fn link_now(&self, id: &str) -> Result<String> {
        let mut state = self.backend.begin(self.index, "create_shareable_link")?;
        let file = state
            .files
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(format!("file {id}")))?;
        let link = format!("{LINK_BASE}/file/{id}/view");
        file.web_link = Some(link.clone());
        Ok(link)
    }

    fn read_now(&self, sheet_id: &str, range: &str) -> Result<CellMatrix> {
        let mut state = self.backend.begin(self.index, "read_range")?;
        let a1 = A1Range::parse(range)?;
        let tab = state.tab_mut(sheet_id, a1.tab.as_deref())?;
        Ok(a1.read(&tab.rows))
    }

    fn write_now(&self, operation: &'static str, sheet_id: &str, range: &str, values: &CellMatrix) -> Result<()> {
        let mut state = self.backend.begin(self.index, operation)?;
        let a1 = A1Range::parse(range)?;
        let tab = state.tab_mut(sheet_id, a1.tab.as_deref())?;
        let start_row = if operation == "append_range" {
            tab.rows.len().max(a1.start_row)
        } else {
            a1.start_row
        };
        write_cells(&mut tab.rows, start_row, a1.start_col, values);
        Ok(())
    }

    fn clear_now(&self, sheet_id: &str, range: &str) -> Result<()> {
        let mut state = self.backend.begin(self.index, "clear_range")?;
        let a1 = A1Range::parse(range)?;
        let tab = state.tab_mut(sheet_id, a1.tab.as_deref())?;
        a1.clear(&mut tab.rows);
        Ok(())
    }

    fn batch_now(&self, sheet_id: &str, requests: &[Value]) -> Result<()> {
        let state = self.backend.begin(self.index, "batch_update")?;
        if !state.sheets.contains_key(sheet_id) {
            return Err(RemoteError::NotFound(format!("spreadsheet {sheet_id}")));
        }
        if let Some(bad) = requests.iter().position(|r| !r.is_object()) {
            return Err(RemoteError::Rejected(format!("request {bad} is not an object")));
        }
        Ok(())
    }

    fn create_spreadsheet_now(&self, title: &str, parent_id: &str) -> Result<SpreadsheetRef> {
        let mut state = self.backend.begin(self.index, "create_spreadsheet")?;
        state.require_folder(parent_id)?;
        let id = state.insert_file(title, SPREADSHEET_MIME_TYPE, parent_id, None);
        state.sheets.insert(
            id.clone(),
            Spreadsheet {
                next_tab_id: 1,
                tabs: vec![Tab {
                    id: 0,
                    name: "Sheet1".into(),
                    rows: Vec::new(),
                }],
            },
        );
        let url = format!("{LINK_BASE}/spreadsheets/{id}/edit");
        Ok(SpreadsheetRef { id, url })
    }

    fn create_tab_now(&self, sheet_id: &str, name: &str) -> Result<i64> {
        let mut state = self.backend.begin(self.index, "create_sheet_tab")?;
        let sheet = state
            .sheets
            .get_mut(sheet_id)
            .ok_or_else(|| RemoteError::NotFound(format!("spreadsheet {sheet_id}")))?;
        if sheet.tabs.iter().any(|t| t.name == name) {
            return Err(RemoteError::Rejected(format!("tab {name} already exists")));
        }
        let id = sheet.next_tab_id;
        sheet.next_tab_id += 1;
        sheet.tabs.push(Tab {
            id,
            name: name.to_string(),
            rows: Vec::new(),
        });
        Ok(id)
    }

    fn create_document_now(&self, title: &str, content: &str, parent_id: &str) -> Result<String> {
        let mut state = self.backend.begin(self.index, "create_document")?;
        state.require_folder(parent_id)?;
        let id = state.insert_file(title, DOCUMENT_MIME_TYPE, parent_id, Some(content.len() as u64));
        state.documents.insert(id.clone(), content.to_string());
        Ok(id)
    }

    fn transfer_now(&self, id: &str, new_owner: &str) -> Result<()> {
        let mut state = self.backend.begin(self.index, "transfer_ownership")?;
        if state.deny_transfers {
            return Err(RemoteError::PermissionDenied(
                "ownership cannot be transferred across organizations".into(),
            ));
        }
        let file = state
            .files
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(format!("file {id}")))?;
        file.owner = Some(new_owner.to_string());
        Ok(())
    }
}

impl RemoteApi for MemoryRemote {
    fn create_folder<'a>(&'a self, name: &'a str, parent_id: &'a str) -> RemoteFuture<'a, String> {
        let result = self.create_folder_now(name, parent_id);
        self.respond(result)
    }

    fn find_folder_by_name<'a>(&'a self, name: &'a str, parent_id: &'a str) -> RemoteFuture<'a, Option<String>> {
        let result = self.find_folder_now(name, parent_id);
        self.respond(result)
    }

    fn upload_blob<'a>(
        &'a self,
        bytes: &'a [u8],
        filename: &'a str,
        mime_type: &'a str,
        parent_id: &'a str,
    ) -> RemoteFuture<'a, String> {
        let result = self.upload_now(bytes, filename, mime_type, parent_id);
        self.respond(result)
    }

    fn list_children<'a>(&'a self, folder_id: &'a str) -> RemoteFuture<'a, Vec<FileMetadata>> {
        let result = self.list_now(folder_id);
        self.respond(result)
    }

    fn get_metadata<'a>(&'a self, id: &'a str) -> RemoteFuture<'a, Option<FileMetadata>> {
        let result = self.metadata_now(id);
        self.respond(result)
    }

    fn delete_file<'a>(&'a self, id: &'a str) -> RemoteFuture<'a, bool> {
        let result = self.delete_now(id);
        self.respond(result)
    }

    fn create_shareable_link<'a>(&'a self, id: &'a str) -> RemoteFuture<'a, String> {
        let result = self.link_now(id);
        self.respond(result)
    }

    fn read_range<'a>(&'a self, sheet_id: &'a str, range: &'a str) -> RemoteFuture<'a, CellMatrix> {
        let result = self.read_now(sheet_id, range);
        self.respond(result)
    }

    fn write_range<'a>(&'a self, sheet_id: &'a str, range: &'a str, values: &'a CellMatrix) -> RemoteFuture<'a, ()> {
        let result = self.write_now("write_range", sheet_id, range, values);
        self.respond(result)
    }

    fn append_range<'a>(&'a self, sheet_id: &'a str, range: &'a str, values: &'a CellMatrix) -> RemoteFuture<'a, ()> {
        let result = self.write_now("append_range", sheet_id, range, values);
        self.respond(result)
    }

    fn clear_range<'a>(&'a self, sheet_id: &'a str, range: &'a str) -> RemoteFuture<'a, ()> {
        let result = self.clear_now(sheet_id, range);
        self.respond(result)
    }

    fn batch_update<'a>(&'a self, sheet_id: &'a str, requests: &'a [Value]) -> RemoteFuture<'a, ()> {
        let result = self.batch_now(sheet_id, requests);
        self.respond(result)
    }

    fn create_spreadsheet<'a>(&'a self, title: &'a str, parent_id: &'a str) -> RemoteFuture<'a, SpreadsheetRef> {
        let result = self.create_spreadsheet_now(title, parent_id);
        self.respond(result)
    }

    fn create_sheet_tab<'a>(&'a self, sheet_id: &'a str, name: &'a str) -> RemoteFuture<'a, i64> {
        let result = self.create_tab_now(sheet_id, name);
        self.respond(result)
    }

    fn create_document<'a>(&'a self, title: &'a str, content: &'a str, parent_id: &'a str) -> RemoteFuture<'a, String> {
        let result = self.create_document_now(title, content, parent_id);
        self.respond(result)
    }

    fn transfer_ownership<'a>(&'a self, id: &'a str, new_owner: &'a str) -> RemoteFuture<'a, ()> {
        let result = self.transfer_now(id, new_owner);
        self.respond(result)
    }
}

/// A parsed A1-notation range such as `Tasks!B2:D` or `A1:C3`.
///
/// Rows and columns are zero-based; `None` end bounds run to the end of data.
#[derive(Debug, PartialEq, Eq)]
struct A1Range {
    tab: Option<String>,
    start_row: usize,
    start_col: usize,
    end_row: Option<usize>,
    end_col: Option<usize>,
}

impl A1Range {
    fn parse(range: &str) -> Result<Self> {
        let (tab, cells) = match range.rsplit_once('!') {
            Some((tab, cells)) => (Some(tab.trim_matches('\'').to_string()), cells),
            None if looks_like_cells(range) => (None, range),
            None => (Some(range.to_string()), ""),
        };
        if cells.is_empty() {
            return Ok(Self {
                tab,
                start_row: 0,
                start_col: 0,
                end_row: None,
                end_col: None,
            });
        }
        let (start, end) = match cells.split_once(':') {
            Some((s, e)) => (s, Some(e)),
            None => (cells, None),
        };
        let (start_col, start_row) = parse_cell(start)?;
        let (end_col, end_row) = match end {
            Some(e) => parse_cell(e)?,
            // A single cell reference addresses exactly that cell.
            None => (start_col, start_row),
        };
        Ok(Self {
            tab,
            start_row: start_row.unwrap_or(0),
            start_col: start_col.unwrap_or(0),
            end_row,
            end_col,
        })
    }

    fn read(&self, rows: &CellMatrix) -> CellMatrix {
        let last_row = self.end_row.map_or(rows.len(), |r| (r + 1).min(rows.len()));
        let mut out: CellMatrix = rows
            .iter()
            .take(last_row)
            .skip(self.start_row)
            .map(|row| {
                let last_col = self.end_col.map_or(row.len(), |c| (c + 1).min(row.len()));
                let mut cells: Vec<Value> = row
                    .iter()
                    .take(last_col)
                    .skip(self.start_col)
                    .cloned()
                    .collect();
                while cells.last().is_some_and(is_blank) {
                    cells.pop();
                }
                cells
            })
            .collect();
        while out.last().is_some_and(|r| r.is_empty()) {
            out.pop();
        }
        out
    }

    fn clear(&self, rows: &mut CellMatrix) {
        let last_row = self.end_row.map_or(rows.len(), |r| (r + 1).min(rows.len()));
        for row in rows.iter_mut().take(last_row).skip(self.start_row) {
            let last_col = self.end_col.map_or(row.len(), |c| (c + 1).min(row.len()));
            for cell in row.iter_mut().take(last_col).skip(self.start_col) {
                *cell = blank();
            }
        }
    }
}

/// True for `B2`, `A:C` or `A1:C3`; false for a bare tab name like `Sheet1`.
fn looks_like_cells(range: &str) -> bool {
    range.split(':').all(|part| {
        let letters = part.chars().take_while(|c| c.is_ascii_alphabetic()).count();
        !part.is_empty() && letters <= 3 && part[letters..].chars().all(|c| c.is_ascii_digit())
    })
}

/// Parse `B12`, `B` or `12` into zero-based (column, row).
fn parse_cell(cell: &str) -> Result<(Option<usize>, Option<usize>)> {
    let letters: String = cell.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let digits = &cell[letters.len()..];
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(RemoteError::Rejected(format!("invalid cell reference {cell}")));
    }
    let col = if letters.is_empty() {
        None
    } else {
        let n = letters
            .to_ascii_uppercase()
            .bytes()
            .fold(0usize, |acc, b| acc * 26 + (b - b'A' + 1) as usize);
        Some(n - 1)
    };
    let row = match digits {
        "" => None,
        d => match d.parse::<usize>() {
            Ok(n) if n > 0 => Some(n - 1),
            _ => return Err(RemoteError::Rejected(format!("invalid row in {cell}"))),
        },
    };
    Ok((col, row))
}

fn blank() -> Value {
    Value::String(String::new())
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn write_cells(rows: &mut CellMatrix, start_row: usize, start_col: usize, values: &CellMatrix) {
    for (i, source) in values.iter().enumerate() {
        let r = start_row + i;
        if rows.len() <= r {
            rows.resize_with(r + 1, Vec::new);
        }
        let row = &mut rows[r];
        for (j, value) in source.iter().enumerate() {
            let c = start_col + j;
            if row.len() <= c {
                row.resize_with(c + 1, blank);
            }
            row[c] = value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matrix(rows: &[&[&str]]) -> CellMatrix {
        rows.iter()
            .map(|r| r.iter().map(|c| json!(c)).collect())
            .collect()
    }

    #[tokio::test]
    async fn folders_are_created_and_found_by_name() {
        let backend = MemoryBackend::new();
        let remote = backend.handle(0);

        let id = remote.create_folder("Gallery", ROOT_FOLDER_ID).await.unwrap();
        let found = remote.find_folder_by_name("Gallery", ROOT_FOLDER_ID).await.unwrap();
        assert_eq!(found, Some(id));

        let missing = remote.find_folder_by_name("Other", ROOT_FOLDER_ID).await.unwrap();
        assert!(missing.is_none());
        assert_eq!(backend.calls("find_folder_by_name"), 2);
    }

    #[tokio::test]
    async fn uploads_show_up_in_listing() {
        let backend = MemoryBackend::new();
        let remote = backend.handle(0);
        let folder = backend.seed_folder("Photos", ROOT_FOLDER_ID);

        remote.upload_blob(b"png", "b.png", "image/png", &folder).await.unwrap();
        remote.upload_blob(b"jpeg", "a.jpg", "image/jpeg", &folder).await.unwrap();

        let names: Vec<String> = remote
            .list_children(&folder)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.png"]);
    }

    #[tokio::test]
    async fn listing_unknown_folder_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.handle(0).list_children("nope").await.unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let backend = MemoryBackend::new();
        let remote = backend.handle(0);
        let id = remote.create_document("Notes", "hello", ROOT_FOLDER_ID).await.unwrap();

        assert!(remote.delete_file(&id).await.unwrap());
        assert!(!remote.delete_file(&id).await.unwrap());
        assert!(remote.get_metadata(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn shareable_link_is_recorded_on_metadata() {
        let backend = MemoryBackend::new();
        let remote = backend.handle(0);
        let id = remote.upload_blob(b"x", "x.txt", "text/plain", ROOT_FOLDER_ID).await.unwrap();

        let link = remote.create_shareable_link(&id).await.unwrap();
        let meta = remote.get_metadata(&id).await.unwrap().unwrap();
        assert_eq!(meta.web_link.as_deref(), Some(link.as_str()));
    }

    #[tokio::test]
    async fn write_append_read_and_clear_ranges() {
        let backend = MemoryBackend::new();
        let remote = backend.handle(0);
        let sheet = remote.create_spreadsheet("Tasks", ROOT_FOLDER_ID).await.unwrap();

        remote
            .write_range(&sheet.id, "Sheet1!A1:B1", &matrix(&[&["task", "owner"]]))
            .await
            .unwrap();
        remote
            .append_range(&sheet.id, "Sheet1!A:B", &matrix(&[&["laundry", "sam"]]))
            .await
            .unwrap();
        remote
            .append_range(&sheet.id, "Sheet1!A:B", &matrix(&[&["dishes", "kim"]]))
            .await
            .unwrap();

        let all = remote.read_range(&sheet.id, "Sheet1!A1:B").await.unwrap();
        assert_eq!(
            all,
            matrix(&[&["task", "owner"], &["laundry", "sam"], &["dishes", "kim"]])
        );

        let owners = remote.read_range(&sheet.id, "Sheet1!B2:B").await.unwrap();
        assert_eq!(owners, matrix(&[&["sam"], &["kim"]]));

        remote.clear_range(&sheet.id, "Sheet1!A2:B").await.unwrap();
        let after = remote.read_range(&sheet.id, "Sheet1").await.unwrap();
        assert_eq!(after, matrix(&[&["task", "owner"]]));
    }

    #[tokio::test]
    async fn sheet_tabs_are_addressable_by_name() {
        let backend = MemoryBackend::new();
        let remote = backend.handle(0);
        let sheet = remote.create_spreadsheet("Log", ROOT_FOLDER_ID).await.unwrap();

        let tab = remote.create_sheet_tab(&sheet.id, "2026-10").await.unwrap();
        assert_eq!(tab, 1);
        remote
            .write_range(&sheet.id, "'2026-10'!C3", &matrix(&[&["x"]]))
            .await
            .unwrap();
        let cell = remote.read_range(&sheet.id, "'2026-10'!C3").await.unwrap();
        assert_eq!(cell, matrix(&[&["x"]]));

        let dup = remote.create_sheet_tab(&sheet.id, "2026-10").await.unwrap_err();
        assert!(matches!(dup, RemoteError::Rejected(_)));
    }

    #[tokio::test]
    async fn batch_update_rejects_non_object_requests() {
        let backend = MemoryBackend::new();
        let remote = backend.handle(0);
        let sheet = remote.create_spreadsheet("Fmt", ROOT_FOLDER_ID).await.unwrap();

        let ok = [json!({"repeatCell": {"range": {"sheetId": 0}}})];
        remote.batch_update(&sheet.id, &ok).await.unwrap();

        let bad = [json!("bold")];
        let err = remote.batch_update(&sheet.id, &bad).await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));
    }

    #[tokio::test]
    async fn scripted_failures_apply_to_one_handle_in_order() {
        let backend = MemoryBackend::new();
        backend.fail_next(1, RemoteError::Auth("revoked".into()));
        backend.fail_next(1, RemoteError::Timeout);

        let healthy = backend.handle(0);
        let flaky = backend.handle(1);

        assert!(healthy.list_children(ROOT_FOLDER_ID).await.is_ok());
        assert!(matches!(flaky.list_children(ROOT_FOLDER_ID).await, Err(RemoteError::Auth(_))));
        assert!(matches!(flaky.list_children(ROOT_FOLDER_ID).await, Err(RemoteError::Timeout)));
        assert!(flaky.list_children(ROOT_FOLDER_ID).await.is_ok());

        assert_eq!(backend.calls_on(0), 1);
        assert_eq!(backend.calls_on(1), 3);
        assert_eq!(backend.total_calls(), 4);
    }

    #[tokio::test]
    async fn transfers_can_be_denied() {
        let backend = MemoryBackend::new();
        let remote = backend.handle(0);
        let id = remote.create_folder("Shared", ROOT_FOLDER_ID).await.unwrap();

        remote.transfer_ownership(&id, "owner@example.org").await.unwrap();
        assert_eq!(backend.owner_of(&id).as_deref(), Some("owner@example.org"));

        backend.deny_transfers(true);
        let err = remote.transfer_ownership(&id, "other@example.org").await.unwrap_err();
        assert!(matches!(err, RemoteError::PermissionDenied(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_responses_on_tokio_time() {
        let backend = MemoryBackend::new();
        backend.set_latency(Duration::from_millis(250));
        let remote = backend.handle(0);

        let start = tokio::time::Instant::now();
        remote.list_children(ROOT_FOLDER_ID).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(backend.calls("list_children"), 1);
    }

    #[test]
    fn a1_parsing() {
        let r = A1Range::parse("Tasks!B2:D").unwrap();
        assert_eq!(r.tab.as_deref(), Some("Tasks"));
        assert_eq!((r.start_row, r.start_col), (1, 1));
        assert_eq!((r.end_row, r.end_col), (None, Some(3)));

        let bare = A1Range::parse("A1:C3").unwrap();
        assert!(bare.tab.is_none());
        assert_eq!((bare.end_row, bare.end_col), (Some(2), Some(2)));

        let whole = A1Range::parse("Sheet1").unwrap();
        assert_eq!(whole.tab.as_deref(), Some("Sheet1"));
        assert_eq!(whole.end_row, None);

        let single = A1Range::parse("C3").unwrap();
        assert!(single.tab.is_none());
        assert_eq!((single.start_row, single.end_col), (2, Some(2)));

        assert!(A1Range::parse("A0").is_err());
        assert_eq!(parse_cell("AA10").unwrap(), (Some(26), Some(9)));
    }
}
