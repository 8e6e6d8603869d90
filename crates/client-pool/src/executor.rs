//! Single remote call execution
//!
//! `OperationExecutor::run` performs exactly one remote call through the
//! handle it is given (plus the optional ownership transfer after a create),
//! maps the remote failure onto the pool taxonomy, and brings the cache in line
//! with the result before returning. It never retries; that is the
//! dispatcher's retry policy.
//!
//! An authentication failure clears the credential's `healthy` flag here, so
//! the very next selection already skips it.

use std::sync::Arc;
use std::time::Duration;

use credentials::CredentialStore;
use remote::{RemoteApi, RemoteError};
use tracing::{debug, info, warn};

use crate::cache::{Cache, Invalidation};
use crate::error::{Error, Result};
use crate::operation::{CacheEffect, Created, Operation, Outcome};
use crate::pool::{Handle, record_unhealthy};
use crate::rate_limit::RatePermit;

/// Runs operations against a chosen handle and keeps the cache consistent.
pub struct OperationExecutor {
    cache: Arc<Cache<Outcome>>,
    store: Arc<CredentialStore>,
    /// Account that receives ownership of created files, when configured.
    owner: Option<String>,
    call_timeout: Duration,
}

impl OperationExecutor {
    pub fn new(
        cache: Arc<Cache<Outcome>>,
        store: Arc<CredentialStore>,
        owner: Option<String>,
        call_timeout: Duration,
    ) -> Self {
        if let Some(owner) = &owner {
            info!(owner = %owner, "ownership transfer enabled for created files");
        }
        Self {
            cache,
            store,
            owner,
            call_timeout,
        }
    }

    /// Perform `op` on `handle`. The caller holds `permit` for that handle.
    pub async fn run(&self, handle: &Handle, permit: &mut RatePermit, op: &Operation) -> Result<Outcome> {
        let generation = self.cache.generation();
        let name = op.name();

        let result = match tokio::time::timeout(self.call_timeout, call(handle.remote(), op)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(RemoteError::NotFound(detail)) => match op.empty_outcome() {
                Some(empty) => {
                    debug!(operation = name, credential = handle.index(), detail = %detail, "target absent, returning empty result");
                    empty
                }
                None => {
                    record_call(name, "not_found");
                    return Err(Error::NotFound(detail));
                }
            },
            Err(err) => {
                record_call(name, err.kind());
                return Err(self.classify(handle, op, err));
            }
        };

        let outcome = match outcome {
            Outcome::Created(created) if op.is_create() => {
                Outcome::Created(self.transfer_ownership(handle, permit, created).await)
            }
            other => other,
        };

        self.apply_cache(op, &outcome, generation);
        record_call(name, "ok");
        Ok(outcome)
    }

    fn classify(&self, handle: &Handle, op: &Operation, err: RemoteError) -> Error {
        let credential = handle.index();
        match err {
            RemoteError::Auth(message) => {
                if handle.credential().mark_unhealthy() {
                    warn!(
                        credential,
                        partition = handle.credential().partition().label(),
                        operation = op.name(),
                        "credential rejected by remote, marked unhealthy"
                    );
                    record_unhealthy(&self.store);
                }
                Error::Auth { credential, message }
            }
            RemoteError::QuotaExceeded(message) => Error::QuotaExceeded { credential, message },
            RemoteError::Network(message) => Error::Transient(message),
            RemoteError::Timeout => Error::Transient(format!(
                "{} timed out after {:?} on credential {credential}",
                op.name(),
                self.call_timeout
            )),
            RemoteError::PermissionDenied(message) => Error::PermissionDenied(message),
            RemoteError::NotFound(message) => Error::NotFound(message),
            RemoteError::Rejected(message) => Error::Rejected(message),
        }
    }

    /// Best-effort handover of a created file. Never fails the create.
    async fn transfer_ownership(&self, handle: &Handle, permit: &mut RatePermit, mut created: Created) -> Created {
        let Some(owner) = self.owner.as_deref() else {
            return created;
        };

        permit.reacquire().await;
        let result = match tokio::time::timeout(
            self.call_timeout,
            handle.remote().transfer_ownership(&created.id, owner),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        };

        match result {
            Ok(()) => {
                record_call("transfer_ownership", "ok");
                debug!(id = %created.id, owner, "ownership transferred");
                created.transferred = true;
            }
            Err(err) => {
                record_call("transfer_ownership", err.kind());
                warn!(
                    id = %created.id,
                    owner,
                    credential = handle.index(),
                    error = %err,
                    "ownership transfer failed, file stays with the service account"
                );
            }
        }
        created
    }

    fn apply_cache(&self, op: &Operation, outcome: &Outcome, generation: u64) {
        if let Some((key, category)) = op.cache_key() {
            if outcome.is_cacheable() {
                self.cache.set_since(key, outcome.clone(), category, generation);
            }
            return;
        }

        for effect in op.cache_effects(outcome) {
            match effect {
                CacheEffect::Invalidate(request) => {
                    self.cache.invalidate(&request);
                }
                CacheEffect::ForgetFolder(id) => {
                    self.cache
                        .invalidate_where(&Invalidation::pattern("folder:"), |value| value.refers_to(&id));
                }
                CacheEffect::Store { key, value, category } => self.cache.set(key, value, category),
            }
        }
    }
}

async fn call(remote: &dyn RemoteApi, op: &Operation) -> remote::Result<Outcome> {
    let outcome = match op {
        Operation::CreateFolder { name, parent_id } => {
            Outcome::Created(Created::new(remote.create_folder(name, parent_id).await?))
        }
        Operation::FindFolderByName { name, parent_id } => {
            Outcome::MaybeId(remote.find_folder_by_name(name, parent_id).await?)
        }
        Operation::UploadBlob {
            bytes,
            filename,
            mime_type,
            parent_id,
        } => Outcome::Created(Created::new(
            remote.upload_blob(bytes, filename, mime_type, parent_id).await?,
        )),
        Operation::ListChildren { folder_id } => Outcome::Files(remote.list_children(folder_id).await?),
        Operation::GetMetadata { id } => Outcome::File(remote.get_metadata(id).await?),
        Operation::DeleteFile { id } => Outcome::Deleted(remote.delete_file(id).await?),
        Operation::CreateShareableLink { id } => Outcome::Link(remote.create_shareable_link(id).await?),
        Operation::ReadRange { sheet_id, range } => Outcome::Values(remote.read_range(sheet_id, range).await?),
        Operation::WriteRange {
            sheet_id,
            range,
            values,
        } => {
            remote.write_range(sheet_id, range, values).await?;
            Outcome::Done
        }
        Operation::AppendRange {
            sheet_id,
            range,
            values,
        } => {
            remote.append_range(sheet_id, range, values).await?;
            Outcome::Done
        }
        Operation::ClearRange { sheet_id, range } => {
            remote.clear_range(sheet_id, range).await?;
            Outcome::Done
        }
        Operation::BatchUpdate { sheet_id, requests } => {
            remote.batch_update(sheet_id, requests).await?;
            Outcome::Done
        }
        Operation::CreateSpreadsheet { title, parent_id } => {
            let sheet = remote.create_spreadsheet(title, parent_id).await?;
            Outcome::Created(Created {
                id: sheet.id,
                url: Some(sheet.url),
                transferred: false,
            })
        }
        Operation::CreateSheetTab { sheet_id, name } => Outcome::Tab(remote.create_sheet_tab(sheet_id, name).await?),
        Operation::CreateDocument {
            title,
            content,
            parent_id,
        } => Outcome::Created(Created::new(
            remote.create_document(title, content, parent_id).await?,
        )),
    };
    Ok(outcome)
}

fn record_call(operation: &'static str, outcome: &'static str) {
    metrics::counter!("pool_remote_calls_total", "operation" => operation, "outcome" => outcome).increment(1);
}
