//! Secret name resolution and concurrent fetching.
//!
//! # Name Sources
//!
//! The first source that yields names wins:
//!
//! 1. `GCP_SECRETS_NAMES` (or the `secret_names` override)
//! 2. `GCP_SECRETS_FILE`, a JSON secrets file; parse failures are fatal
//! 3. The nearest `.gcp-secrets.json`, when auto-discovery is enabled
//! 4. Every secret registered in the project
//!
//! # Example
//!
//! ```no_run
//! # async fn example() -> gcp_secret_env::Result<()> {
//! let secrets = gcp_secret_env::load(None).await?;
//! println!("Loaded {} variable(s)", secrets.len());
//! # Ok(())
//! # }
//! ```

use crate::config::{Config, ConfigOverrides, NAMES_VAR};
use crate::env_store::{apply_secret, EnvStore, ProcessEnv};
use crate::error::{Error, Result};
use crate::secrets_file::{self, SecretsFile};
use crate::store::{GcpSecretManager, SecretStore};
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Key of the synthetic entry carrying the ambient project id
pub const PROJECT_ID_KEY: &str = "GOOGLE_PROJECT_ID";

/// Final environment key to secret value.
pub type LoadedSecrets = BTreeMap<String, String>;

/// Owns the name priority chain and the fetch for one load.
pub struct SecretResolver<'a> {
    config: Config,
    store: &'a dyn SecretStore,
    env: &'a dyn EnvStore,
    working_dir: Option<PathBuf>,
}

impl<'a> SecretResolver<'a> {
    pub fn new(config: Config, store: &'a dyn SecretStore, env: &'a dyn EnvStore) -> Self {
        Self {
            config,
            store,
            env,
            working_dir: None,
        }
    }

    /// Resolve relative paths and start discovery from `dir` instead of the
    /// process working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Current snapshot, including any file backfill.
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn working_dir(&self) -> Option<PathBuf> {
        self.working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
    }

    /// Decide which secret names to load.
    ///
    /// # Errors
    ///
    /// Fails if an explicit secrets file is unreadable or malformed, or if
    /// listing the project's secrets fails.
    pub async fn resolve_secret_names(&mut self, project_id: &str) -> Result<Vec<String>> {
        if let Some(names) = self.config.secret_names.as_ref().filter(|n| !n.is_empty()) {
            debug!("Using {} secret name(s) from {}", names.len(), NAMES_VAR);
            return Ok(dedupe(names.iter().cloned()));
        }

        if let Some(path) = self.config.secret_names_path.clone() {
            let path = match self.working_dir() {
                Some(dir) => dir.join(path),
                None => path,
            };
            let file = SecretsFile::load(&path)?;
            self.config = self.config.with_file_defaults(&file);
            let names = dedupe(file.secrets.unwrap_or_default());
            debug!("Using {} secret name(s) from {:?}", names.len(), path);
            return Ok(names);
        }

        if self.config.auto_discover {
            if let Some(names) = self.discover_names() {
                return Ok(names);
            }
        }

        info!(
            "No secret names configured, loading every secret in project {}",
            project_id
        );
        let names = self.store.list_secret_names(project_id).await?;
        Ok(dedupe(names))
    }

    fn discover_names(&mut self) -> Option<Vec<String>> {
        let start = self.working_dir()?;
        let path = secrets_file::discover(&start)?;

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Ignoring unreadable discovery file {:?}: {}", path, e);
                return None;
            }
        };

        let file = SecretsFile::parse(&content);
        if !file.has_names() {
            debug!("Discovery file {:?} names no secrets, falling through", path);
            return None;
        }

        self.config = self.config.with_file_defaults(&file);
        let names = dedupe(file.secrets.unwrap_or_default());
        debug!("Using {} secret name(s) from {:?}", names.len(), path);
        Some(names)
    }

    /// Fetch every name concurrently.
    ///
    /// Each fetched value is written to the environment store under the
    /// precedence rule. Failed fetches are logged and left out; they never
    /// affect sibling fetches. The project id entry is always present, and a
    /// secret whose key collides with it is skipped.
    pub async fn fetch_all(&self, names: &[String], project_id: &str) -> LoadedSecrets {
        let override_existing = self.config.override_existing;

        let fetches = names.iter().map(|name| async move {
            match self.store.access_secret(project_id, name).await {
                Ok(value) => {
                    let key = self.config.env_key(name);
                    if key == PROJECT_ID_KEY {
                        warn!(
                            "Skipping secret '{}': {} is reserved for the project id",
                            name, PROJECT_ID_KEY
                        );
                        return None;
                    }
                    if !apply_secret(self.env, &key, &value, override_existing) {
                        debug!("Keeping existing value of {}", key);
                    }
                    Some((key, value))
                }
                Err(e) => {
                    error!("Failed to load secret '{}': {}", name, e);
                    None
                }
            }
        });

        let fetched: Vec<(String, String)> =
            join_all(fetches).await.into_iter().flatten().collect();
        let fetched_count = fetched.len();
        let mut loaded: LoadedSecrets = fetched.into_iter().collect();

        apply_secret(self.env, PROJECT_ID_KEY, project_id, override_existing);
        loaded.insert(PROJECT_ID_KEY.to_string(), project_id.to_string());

        info!(
            "Loaded {} of {} secret(s) from project {}",
            fetched_count,
            names.len(),
            project_id
        );
        loaded
    }

    /// Resolve the project, the names, and fetch.
    pub async fn load(&mut self) -> Result<LoadedSecrets> {
        let project_id = self.store.project_id().await.map_err(|e| match e {
            Error::ProjectId(_) => e,
            other => Error::ProjectId(other.to_string()),
        })?;

        let names = self.resolve_secret_names(&project_id).await?;
        if names.is_empty() {
            info!("Secret name set is empty, nothing to fetch");
        }

        Ok(self.fetch_all(&names, &project_id).await)
    }
}

/// Keep the first occurrence of each name.
fn dedupe(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Load with explicit collaborators, bounded by the configured timeout.
///
/// # Errors
///
/// Returns [`Error::Timeout`] if resolution and fetching exceed
/// [`Config::fetch_timeout`]; the in-flight work is dropped.
pub async fn load_secrets(
    config: Config,
    store: &dyn SecretStore,
    env: &dyn EnvStore,
) -> Result<LoadedSecrets> {
    let timeout = config.fetch_timeout();
    let mut resolver = SecretResolver::new(config, store, env);

    match tokio::time::timeout(timeout, resolver.load()).await {
        Ok(result) => result,
        Err(_) => {
            let millis = timeout.as_millis() as u64;
            warn!("Loading secrets timed out after {} ms", millis);
            Err(Error::Timeout(millis))
        }
    }
}

/// Load secrets from Secret Manager into the process environment.
///
/// `overrides` replaces environment-derived settings field by field.
pub async fn load(overrides: Option<ConfigOverrides>) -> Result<LoadedSecrets> {
    let env = ProcessEnv;
    let config = Config::merge_with_overrides(&env, overrides.unwrap_or_default());
    let store = GcpSecretManager::from_env(&env)?;

    load_secrets(config, &store, &env).await
}
