//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Credential keys may sit in the TOML, but the usual deployment keeps them in
//! a separate bundle file or in `POOL_CREDENTIAL_<n>` env vars so the config
//! file itself holds no secrets.

use client_pool::PoolConfig;
use credentials::CredentialBundle;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Prefix of the numbered credential environment variables.
pub const CREDENTIAL_ENV_PREFIX: &str = "POOL_CREDENTIAL";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// Admin HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

/// Where credential bundles come from, besides the environment.
#[derive(Debug, Default, Deserialize)]
pub struct CredentialsConfig {
    /// JSON file holding one bundle or an array of bundles.
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub bundles: Vec<CredentialBundle>,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_max_connections() -> usize {
    256
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;

        config
            .pool
            .validate()
            .map_err(|e| common::Error::Config(e.to_string()))?;

        if config.admin.max_connections == 0 {
            return Err(common::Error::invalid("admin.max_connections", "must be greater than 0"));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("pool-admin.toml")
    }

    /// Gather credential bundles in order: inline bundles, the bundle file,
    /// then `{env_prefix}_1..N`.
    ///
    /// Malformed entries are skipped by the readers. An unreadable bundle
    /// file is an error; an empty total is left for `CredentialStore::load`
    /// to reject.
    pub async fn collect_bundles(&self, env_prefix: &str) -> common::Result<Vec<CredentialBundle>> {
        let mut bundles = self.credentials.bundles.clone();
        let inline = bundles.len();

        if let Some(ref file) = self.credentials.file {
            let from_file = credentials::read_bundle_file(file)
                .await
                .map_err(|e| common::Error::Config(e.to_string()))?;
            bundles.extend(from_file);
        }
        let from_file = bundles.len() - inline;

        let from_env = credentials::bundles_from_env(env_prefix);
        let env_count = from_env.len();
        bundles.extend(from_env);

        info!(inline, from_file, from_env = env_count, "collected credential bundles");
        Ok(bundles)
    }
}
