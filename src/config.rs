// GCP Secret Env Configuration Module
//
// This module builds the immutable configuration snapshot from environment
// variables layered over compiled-in defaults.

use crate::env_store::{EnvStore, ProcessEnv};
use crate::secrets_file::SecretsFile;
use std::path::PathBuf;
use std::time::Duration;

/// Comma-separated list of secret names to load
pub const NAMES_VAR: &str = "GCP_SECRETS_NAMES";
/// Path to a JSON secrets file
pub const FILE_VAR: &str = "GCP_SECRETS_FILE";
/// Whether fetched values replace already-set variables
pub const OVERRIDE_VAR: &str = "GCP_SECRETS_OVERRIDE";
/// Enables debug logging
pub const DEBUG_VAR: &str = "GCP_SECRETS_DEBUG";
/// Timeout in milliseconds
pub const TIMEOUT_VAR: &str = "GCP_SECRETS_TIMEOUT";
/// Set to "false" to disable discovery file lookup
pub const AUTO_DISCOVER_VAR: &str = "GCP_SECRETS_AUTO_DISCOVER";
/// Prefix prepended to every secret name
pub const PREFIX_VAR: &str = "GCP_SECRETS_PREFIX";
/// Double-load guard, set by the supervisor after a successful merge
pub const LOADED_GUARD_VAR: &str = "GCP_SECRETS_LOADED";
/// Role marker carried only by the fetcher child process
pub const FETCHER_ROLE_VAR: &str = "GCP_SECRETS_FETCHER";

/// Bound on the resolve + fetch sequence when no timeout is configured
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
/// Bound on the supervisor's wait for the child when no timeout is configured
pub const DEFAULT_SUPERVISOR_TIMEOUT_MS: u64 = 30_000;

/// Which backfillable fields were set by environment or overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ExplicitFields {
    env_prefix: bool,
    override_existing: bool,
}

/// Immutable configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Explicit secret names, in order
    pub secret_names: Option<Vec<String>>,

    /// Explicit secrets file
    pub secret_names_path: Option<PathBuf>,

    /// Replace variables that are already set
    pub override_existing: bool,

    /// Debug logging
    pub debug: bool,

    /// Configured timeout, if the variable parsed
    pub timeout_ms: Option<u64>,

    /// Walk parent directories for a discovery file
    pub auto_discover: bool,

    /// Prefix for environment keys; `Some("")` is a valid no-op prefix
    pub env_prefix: Option<String>,

    explicit: ExplicitFields,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            secret_names: None,
            secret_names_path: None,
            override_existing: false,
            debug: false,
            timeout_ms: None,
            auto_discover: true,
            env_prefix: None,
            explicit: ExplicitFields::default(),
        }
    }
}

/// Caller-supplied replacements; each `Some` field wins over the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub secret_names: Option<Vec<String>>,
    pub secret_names_path: Option<PathBuf>,
    pub override_existing: Option<bool>,
    pub debug: Option<bool>,
    pub timeout_ms: Option<u64>,
    pub auto_discover: Option<bool>,
    pub env_prefix: Option<String>,
}

impl Config {
    /// Resolve configuration from an environment store.
    ///
    /// Never fails: malformed values fall back to defaults.
    pub fn from_env(env: &dyn EnvStore) -> Self {
        let mut config = Self::default();

        if let Some(raw) = env.get(NAMES_VAR) {
            let names = parse_name_list(&raw);
            if !names.is_empty() {
                config.secret_names = Some(names);
            }
        }

        if let Some(path) = env.get(FILE_VAR) {
            config.secret_names_path = Some(PathBuf::from(path));
        }

        if let Some(raw) = env.get(OVERRIDE_VAR) {
            config.override_existing = raw.eq_ignore_ascii_case("true");
            config.explicit.override_existing = true;
        }

        if let Some(raw) = env.get(DEBUG_VAR) {
            config.debug = raw.eq_ignore_ascii_case("true");
        }

        if let Some(raw) = env.get(TIMEOUT_VAR) {
            config.timeout_ms = raw.trim().parse::<u64>().ok();
        }

        if let Some(raw) = env.get(AUTO_DISCOVER_VAR) {
            config.auto_discover = !raw.eq_ignore_ascii_case("false");
        }

        if let Some(prefix) = env.get(PREFIX_VAR) {
            config.env_prefix = Some(prefix);
            config.explicit.env_prefix = true;
        }

        config
    }

    /// Resolve configuration from the live process environment.
    pub fn from_process_env() -> Self {
        Self::from_env(&ProcessEnv)
    }

    /// Environment-derived snapshot with caller overrides applied per field.
    pub fn merge_with_overrides(env: &dyn EnvStore, overrides: ConfigOverrides) -> Self {
        Self::from_env(env).with_overrides(overrides)
    }

    /// Apply overrides to this snapshot, returning a new one.
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(names) = overrides.secret_names {
            self.secret_names = Some(names);
        }
        if let Some(path) = overrides.secret_names_path {
            self.secret_names_path = Some(path);
        }
        if let Some(value) = overrides.override_existing {
            self.override_existing = value;
            self.explicit.override_existing = true;
        }
        if let Some(value) = overrides.debug {
            self.debug = value;
        }
        if let Some(value) = overrides.timeout_ms {
            self.timeout_ms = Some(value);
        }
        if let Some(value) = overrides.auto_discover {
            self.auto_discover = value;
        }
        if let Some(prefix) = overrides.env_prefix {
            self.env_prefix = Some(prefix);
            self.explicit.env_prefix = true;
        }
        self
    }

    /// Backfill prefix and override flag from a secrets file.
    ///
    /// Only fields that were not set explicitly are filled.
    pub fn with_file_defaults(&self, file: &SecretsFile) -> Self {
        let mut next = self.clone();
        if !next.explicit.env_prefix {
            if let Some(prefix) = &file.prefix {
                next.env_prefix = Some(prefix.clone());
            }
        }
        if !next.explicit.override_existing {
            if let Some(value) = file.override_existing {
                next.override_existing = value;
            }
        }
        next
    }

    /// Final environment key for a secret name.
    pub fn env_key(&self, name: &str) -> String {
        match &self.env_prefix {
            Some(prefix) => format!("{}{}", prefix, name),
            None => name.to_string(),
        }
    }

    /// Bound on the resolve + fetch sequence.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    /// Bound on the supervisor's wait for the fetcher child.
    pub fn supervisor_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_SUPERVISOR_TIMEOUT_MS))
    }
}

/// Split a comma-separated list, trimming entries and dropping empties.
pub fn parse_name_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
