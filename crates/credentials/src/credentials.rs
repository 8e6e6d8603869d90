//! Credential store for the client pool
//!
//! Holds the fixed, ordered list of credentials for the process lifetime. A
//! credential's identity never changes after `load`; only its `healthy` flag
//! flips, and that flag is a single atomic so dispatchers on many tasks can
//! read it while the executor clears it on an authentication failure.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Traffic class of a call, which is also the partition a credential serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficClass {
    /// Calls made on behalf of a live user request.
    Interactive,
    /// Calls made by scheduled or batch jobs.
    Background,
}

impl TrafficClass {
    pub fn label(&self) -> &'static str {
        match self {
            TrafficClass::Interactive => "interactive",
            TrafficClass::Background => "background",
        }
    }
}

impl std::fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One credential bundle as configured: a service identity and its key.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialBundle {
    /// Display name for logs; defaults to the client email.
    #[serde(default)]
    pub name: Option<String>,
    pub client_email: String,
    pub private_key: Secret<String>,
}

impl CredentialBundle {
    pub fn new(name: impl Into<String>, client_email: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            client_email: client_email.into(),
            private_key: Secret::new(private_key.into()),
        }
    }

    fn is_usable(&self) -> bool {
        !self.client_email.trim().is_empty() && !self.private_key.is_empty()
    }
}

/// How credentials are split between the interactive and background partitions.
///
/// `interactive_count` wins over `interactive_ratio` when both are set. The
/// result is always clamped to `1..=N`, so the interactive partition is never
/// empty and an N of one leaves the background partition empty.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct PartitionSplit {
    pub interactive_ratio: f64,
    pub interactive_count: Option<usize>,
}

impl Default for PartitionSplit {
    fn default() -> Self {
        Self {
            interactive_ratio: 0.5,
            interactive_count: None,
        }
    }
}

impl PartitionSplit {
    pub fn ratio(interactive_ratio: f64) -> Self {
        Self {
            interactive_ratio,
            interactive_count: None,
        }
    }

    pub fn count(interactive_count: usize) -> Self {
        Self {
            interactive_count: Some(interactive_count),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.interactive_ratio > 0.0 && self.interactive_ratio <= 1.0) {
            return Err(Error::Invalid(format!(
                "interactive_ratio must be in (0, 1], got {}",
                self.interactive_ratio
            )));
        }
        if self.interactive_count == Some(0) {
            return Err(Error::Invalid("interactive_count must be at least 1".into()));
        }
        Ok(())
    }

    /// Number of interactive credentials out of `total`.
    pub fn interactive_count(&self, total: usize) -> usize {
        if total == 0 {
            return 0;
        }
        let wanted = match self.interactive_count {
            Some(count) => count,
            // Small epsilon so ratios like 0.6 of 5 land on 3, not 2.
            None => ((total as f64) * self.interactive_ratio + 1e-9).floor() as usize,
        };
        wanted.clamp(1, total)
    }
}

/// A loaded credential.
#[derive(Debug)]
pub struct Credential {
    index: usize,
    name: String,
    client_email: String,
    private_key: Secret<String>,
    partition: TrafficClass,
    healthy: AtomicBool,
}

impl Credential {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    pub fn private_key(&self) -> &Secret<String> {
        &self.private_key
    }

    pub fn partition(&self) -> TrafficClass {
        self.partition
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Clear the healthy flag. Returns true if this call changed it.
    pub fn mark_unhealthy(&self) -> bool {
        self.healthy.swap(false, Ordering::AcqRel)
    }

    /// Set the healthy flag again. Returns true if this call changed it.
    pub fn mark_healthy(&self) -> bool {
        !self.healthy.swap(true, Ordering::AcqRel)
    }
}

/// Immutable, ordered set of credentials.
#[derive(Debug)]
pub struct CredentialStore {
    credentials: Vec<Arc<Credential>>,
    interactive_count: usize,
}

impl CredentialStore {
    /// Build the store from configured bundles.
    ///
    /// Bundles without an email or key, and repeats of an email already seen,
    /// are skipped with a warning: a duplicate identity shares its quota and
    /// adds nothing. The survivors keep their configured order, are numbered
    /// 0..N-1, and the first `split.interactive_count(N)` serve interactive
    /// traffic. Fails with `NoCredentials` if nothing survives.
    pub fn load(bundles: Vec<CredentialBundle>, split: PartitionSplit) -> Result<Self> {
        split.validate()?;

        let mut seen = HashSet::new();
        let usable: Vec<CredentialBundle> = bundles
            .into_iter()
            .enumerate()
            .filter_map(|(position, bundle)| {
                if !bundle.is_usable() {
                    warn!(position, "skipping credential bundle with empty email or key");
                    return None;
                }
                if !seen.insert(bundle.client_email.clone()) {
                    warn!(position, client_email = %bundle.client_email, "skipping duplicate credential bundle");
                    return None;
                }
                Some(bundle)
            })
            .collect();

        if usable.is_empty() {
            return Err(Error::NoCredentials);
        }

        let interactive_count = split.interactive_count(usable.len());
        let credentials: Vec<Arc<Credential>> = usable
            .into_iter()
            .enumerate()
            .map(|(index, bundle)| {
                let partition = if index < interactive_count {
                    TrafficClass::Interactive
                } else {
                    TrafficClass::Background
                };
                Arc::new(Credential {
                    index,
                    name: bundle.name.unwrap_or_else(|| bundle.client_email.clone()),
                    client_email: bundle.client_email,
                    private_key: bundle.private_key,
                    partition,
                    healthy: AtomicBool::new(true),
                })
            })
            .collect();

        info!(
            credentials = credentials.len(),
            interactive = interactive_count,
            background = credentials.len() - interactive_count,
            "credential store loaded"
        );

        Ok(Self {
            credentials,
            interactive_count,
        })
    }

    /// All credentials in index order.
    pub fn credentials(&self) -> &[Arc<Credential>] {
        &self.credentials
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Credential>> {
        self.credentials.get(index)
    }

    /// Credentials serving `class`, in index order.
    pub fn partition(&self, class: TrafficClass) -> impl Iterator<Item = &Arc<Credential>> {
        self.credentials.iter().filter(move |c| c.partition() == class)
    }

    pub fn interactive_count(&self) -> usize {
        self.interactive_count
    }

    pub fn background_count(&self) -> usize {
        self.credentials.len() - self.interactive_count
    }

    pub fn unhealthy_count(&self) -> usize {
        self.credentials.iter().filter(|c| !c.is_healthy()).count()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Always false for a loaded store; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundles(n: usize) -> Vec<CredentialBundle> {
        (0..n)
            .map(|i| CredentialBundle::new(format!("sa-{i}"), format!("sa-{i}@example.iam"), format!("key-{i}")))
            .collect()
    }

    #[test]
    fn empty_configuration_is_fatal() {
        let err = CredentialStore::load(vec![], PartitionSplit::default()).unwrap_err();
        assert!(matches!(err, Error::NoCredentials));
    }

    #[test]
    fn unusable_bundles_are_skipped() {
        let mut input = bundles(2);
        input.push(CredentialBundle::new("blank", "", "key"));
        input.push(CredentialBundle::new("nokey", "x@example.iam", "   "));

        let store = CredentialStore::load(input, PartitionSplit::default()).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn only_unusable_bundles_is_fatal() {
        let input = vec![CredentialBundle::new("blank", "", "")];
        let err = CredentialStore::load(input, PartitionSplit::default()).unwrap_err();
        assert!(matches!(err, Error::NoCredentials));
    }

    #[test]
    fn duplicate_identities_are_skipped() {
        let mut input = bundles(2);
        input.push(CredentialBundle::new("again", "sa-0@example.iam", "other-key"));

        let store = CredentialStore::load(input, PartitionSplit::default()).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn indices_follow_configured_order() {
        let store = CredentialStore::load(bundles(4), PartitionSplit::default()).unwrap();
        let names: Vec<&str> = store.credentials().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["sa-0", "sa-1", "sa-2", "sa-3"]);
        for (i, c) in store.credentials().iter().enumerate() {
            assert_eq!(c.index(), i);
        }
    }

    #[test]
    fn default_split_is_half_rounded_down_with_minimum_one() {
        let split = PartitionSplit::default();
        assert_eq!(split.interactive_count(1), 1);
        assert_eq!(split.interactive_count(2), 1);
        assert_eq!(split.interactive_count(5), 2);
        assert_eq!(split.interactive_count(6), 3);
    }

    #[test]
    fn ratio_and_count_overrides() {
        assert_eq!(PartitionSplit::ratio(0.6).interactive_count(5), 3);
        assert_eq!(PartitionSplit::ratio(1.0).interactive_count(5), 5);
        assert_eq!(PartitionSplit::count(3).interactive_count(5), 3);
        assert_eq!(PartitionSplit::count(9).interactive_count(5), 5);
    }

    #[test]
    fn invalid_splits_are_rejected() {
        assert!(PartitionSplit::ratio(0.0).validate().is_err());
        assert!(PartitionSplit::ratio(1.5).validate().is_err());
        assert!(PartitionSplit::count(0).validate().is_err());
        assert!(PartitionSplit::ratio(f64::NAN).validate().is_err());
    }

    #[test]
    fn first_credentials_serve_interactive_traffic() {
        let store = CredentialStore::load(bundles(5), PartitionSplit::count(3)).unwrap();
        let interactive: Vec<usize> = store.partition(TrafficClass::Interactive).map(|c| c.index()).collect();
        let background: Vec<usize> = store.partition(TrafficClass::Background).map(|c| c.index()).collect();
        assert_eq!(interactive, vec![0, 1, 2]);
        assert_eq!(background, vec![3, 4]);
        assert_eq!(store.interactive_count(), 3);
        assert_eq!(store.background_count(), 2);
    }

    #[test]
    fn healthy_flag_transitions_report_changes() {
        let store = CredentialStore::load(bundles(1), PartitionSplit::default()).unwrap();
        let cred = store.get(0).unwrap();
        assert!(cred.is_healthy());

        assert!(cred.mark_unhealthy());
        assert!(!cred.mark_unhealthy());
        assert_eq!(store.unhealthy_count(), 1);

        assert!(cred.mark_healthy());
        assert!(!cred.mark_healthy());
        assert!(cred.is_healthy());
    }

    #[test]
    fn name_defaults_to_email() {
        let bundle: CredentialBundle =
            serde_json::from_str(r#"{"client_email":"ops@example.iam","private_key":"k"}"#).unwrap();
        let store = CredentialStore::load(vec![bundle], PartitionSplit::default()).unwrap();
        assert_eq!(store.get(0).unwrap().name(), "ops@example.iam");
    }

    #[test]
    fn debug_output_never_contains_key_material() {
        let store = CredentialStore::load(bundles(1), PartitionSplit::default()).unwrap();
        let debug = format!("{store:?}");
        assert!(!debug.contains("key-0"), "got: {debug}");
    }
}
