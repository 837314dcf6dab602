//! Environment variable store abstraction.
//!
//! Everything that reads or writes environment variables goes through
//! [`EnvStore`], so the precedence rules can be exercised against an
//! in-memory map instead of the real process environment.

use std::collections::HashMap;
use std::ffi::OsString;
use std::sync::{Mutex, MutexGuard};

/// A string-to-string variable store with get/set/has semantics.
///
/// Implementations never delete keys; loading only adds or overwrites.
pub trait EnvStore: Send + Sync {
    /// Get the value of a variable, if set and valid UTF-8.
    fn get(&self, key: &str) -> Option<String>;

    /// Set a variable.
    fn set(&self, key: &str, value: &str);

    /// All variables with UTF-8 names and values.
    fn vars(&self) -> Vec<(String, String)>;

    /// All variables as raw OS strings, used to seed the fetcher child.
    fn vars_os(&self) -> Vec<(OsString, OsString)> {
        self.vars()
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect()
    }

    /// Whether a variable is currently set.
    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Serializes writes to the real process environment.
static PROCESS_ENV_LOCK: Mutex<()> = Mutex::new(());

fn process_env_lock() -> MutexGuard<'static, ()> {
    PROCESS_ENV_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The live process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvStore for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn set(&self, key: &str, value: &str) {
        let _guard = process_env_lock();
        std::env::set_var(key, value);
    }

    // Non UTF-8 entries are skipped rather than panicking like `env::vars`
    fn vars(&self) -> Vec<(String, String)> {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    fn vars_os(&self) -> Vec<(OsString, OsString)> {
        std::env::vars_os().collect()
    }

    fn has(&self, key: &str) -> bool {
        std::env::var_os(key).is_some()
    }
}

/// In-memory store, mainly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryEnv {
    vars: Mutex<HashMap<String, String>>,
}

impl MemoryEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with the given pairs.
    pub fn with_vars<K, V, I>(vars: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let map = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            vars: Mutex::new(map),
        }
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.vars.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EnvStore for MemoryEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.lock().insert(key.to_string(), value.to_string());
    }

    fn vars(&self) -> Vec<(String, String)> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Write `key=value` unless the key is already set and overriding is off.
///
/// Returns `true` when the store was written.
pub fn apply_secret(env: &dyn EnvStore, key: &str, value: &str, override_existing: bool) -> bool {
    if override_existing || !env.has(key) {
        env.set(key, value);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_secret_sets_unset_key() {
        let env = MemoryEnv::new();

        assert!(apply_secret(&env, "API_KEY", "fetched", false));
        assert_eq!(env.get("API_KEY").as_deref(), Some("fetched"));
    }

    #[test]
    fn test_apply_secret_preserves_existing_key() {
        let env = MemoryEnv::with_vars([("API_KEY", "local")]);

        assert!(!apply_secret(&env, "API_KEY", "fetched", false));
        assert_eq!(env.get("API_KEY").as_deref(), Some("local"));
    }

    #[test]
    fn test_apply_secret_overrides_when_enabled() {
        let env = MemoryEnv::with_vars([("API_KEY", "local")]);

        assert!(apply_secret(&env, "API_KEY", "fetched", true));
        assert_eq!(env.get("API_KEY").as_deref(), Some("fetched"));
    }

    #[cfg(unix)]
    #[test]
    #[serial_test::serial]
    fn test_process_env_passes_non_utf8_values() {
        use std::os::unix::ffi::OsStringExt;

        let raw = OsString::from_vec(vec![b'v', b'a', b'l', 0xff]);
        std::env::set_var("GSE_NON_UTF8_VALUE", &raw);
        let raw_vars = ProcessEnv.vars_os();
        let utf8_vars = ProcessEnv.vars();
        std::env::remove_var("GSE_NON_UTF8_VALUE");

        assert!(raw_vars.contains(&(OsString::from("GSE_NON_UTF8_VALUE"), raw)));
        assert!(!utf8_vars.iter().any(|(k, _)| k == "GSE_NON_UTF8_VALUE"));
    }

    #[test]
    fn test_empty_value_counts_as_set() {
        let env = MemoryEnv::with_vars([("API_KEY", "")]);

        assert!(env.has("API_KEY"));
        assert!(!apply_secret(&env, "API_KEY", "fetched", false));
    }
}
