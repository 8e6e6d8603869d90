//! Credential bundle sources
//!
//! Bundles come from a JSON file (an array of bundles, or a single bundle
//! object) and from numbered environment variables (`PREFIX_1`, `PREFIX_2`, ...,
//! each holding one JSON bundle). A malformed entry is logged and skipped so
//! that one bad bundle does not take the whole pool down; whether anything
//! usable remains is decided later by `CredentialStore::load`.

use std::path::Path;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::credentials::CredentialBundle;
use crate::error::{Error, Result};

/// Read bundles from a JSON file.
///
/// A missing or unreadable file and a file that is not JSON at all are
/// errors. Individual entries that do not parse as a bundle are skipped.
pub async fn read_bundle_file(path: &Path) -> Result<Vec<CredentialBundle>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Io(format!("reading credential file {}: {e}", path.display())))?;
    let document: Value = serde_json::from_str(&contents)
        .map_err(|e| Error::Parse(format!("parsing credential file {}: {e}", path.display())))?;

    let entries = match document {
        Value::Array(entries) => entries,
        single @ Value::Object(_) => vec![single],
        other => {
            return Err(Error::Parse(format!(
                "credential file {} must hold an object or array, found {}",
                path.display(),
                json_kind(&other)
            )));
        }
    };

    let total = entries.len();
    let bundles: Vec<CredentialBundle> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(position, entry)| match serde_json::from_value(entry) {
            Ok(bundle) => Some(bundle),
            Err(e) => {
                warn!(path = %path.display(), position, error = %e, "skipping malformed credential bundle");
                None
            }
        })
        .collect();

    info!(path = %path.display(), entries = total, parsed = bundles.len(), "read credential file");
    Ok(bundles)
}

/// Collect bundles from `{prefix}_1`, `{prefix}_2`, ... until the first unset index.
pub fn bundles_from_env(prefix: &str) -> Vec<CredentialBundle> {
    bundles_from_lookup(prefix, |key| std::env::var(key).ok())
}

fn bundles_from_lookup(prefix: &str, lookup: impl Fn(&str) -> Option<String>) -> Vec<CredentialBundle> {
    let mut bundles = Vec::new();
    for n in 1.. {
        let key = format!("{prefix}_{n}");
        let Some(raw) = lookup(&key) else {
            break;
        };
        match serde_json::from_str::<CredentialBundle>(&raw) {
            Ok(bundle) => {
                debug!(variable = %key, "read credential bundle from environment");
                bundles.push(bundle);
            }
            Err(e) => warn!(variable = %key, error = %e, "skipping malformed credential bundle"),
        }
    }
    bundles
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
