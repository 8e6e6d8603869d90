//! Credential bundles for the workspace client pool
//!
//! Each bundle is an independent service identity with its own call quota
//! against the remote API. Bundles are gathered once at startup from
//! configuration, a JSON bundle file and numbered environment variables, then
//! frozen into a `CredentialStore`. The only mutable state afterwards is each
//! credential's `healthy` flag.
//!
//! Loading flow:
//! 1. `sources::read_bundle_file()` / `sources::bundles_from_env()` collect raw bundles
//! 2. `CredentialStore::load()` drops unusable bundles, numbers the rest 0..N-1
//!    and assigns each to the interactive or background partition
//! 3. Zero usable bundles is `Error::NoCredentials`, which callers treat as fatal

pub mod credentials;
pub mod error;
pub mod sources;

pub use credentials::{Credential, CredentialBundle, CredentialStore, PartitionSplit, TrafficClass};
pub use error::{Error, Result};
pub use sources::{bundles_from_env, read_bundle_file};
