//! Fetcher child process entry.
//!
//! Resolves configuration from its inherited environment, loads secrets and
//! writes the sentinel plus JSON payload to stdout. On failure nothing is
//! written after the logs; the reason goes to stderr and the exit code is 1.

use crate::config::{Config, FETCHER_ROLE_VAR};
use crate::env_store::{EnvStore, ProcessEnv};
use crate::logging;
use crate::protocol;
use crate::resolver::load_secrets;
use crate::store::{GcpSecretManager, SecretStore};
use anyhow::{Context, Result};
use std::io::Write;

/// Whether this process was spawned as the fetcher child.
pub fn is_fetcher_process() -> bool {
    std::env::var_os(FETCHER_ROLE_VAR).is_some()
}

/// Load secrets and render the stdout payload.
pub async fn fetch_payload(
    config: Config,
    store: &dyn SecretStore,
    env: &dyn EnvStore,
) -> Result<String> {
    let secrets = load_secrets(config, store, env)
        .await
        .context("Failed to load secrets")?;

    protocol::encode(&secrets).context("Failed to serialize secrets payload")
}

async fn fetch_from_process_env(config: Config) -> Result<String> {
    let env = ProcessEnv;
    let store = GcpSecretManager::from_env(&env).context("Failed to create Secret Manager client")?;

    fetch_payload(config, &store, &env).await
}

/// Run the fetcher and return the process exit code.
pub fn run() -> i32 {
    let config = Config::from_process_env();
    logging::init_fetcher(config.debug);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("gcp-secret-env fetcher: failed to start runtime: {}", e);
            return 1;
        }
    };

    let payload = match runtime.block_on(fetch_from_process_env(config)) {
        Ok(payload) => payload,
        Err(e) => {
            eprintln!("gcp-secret-env fetcher: {:#}", e);
            return 1;
        }
    };

    let mut stdout = std::io::stdout().lock();
    if let Err(e) = stdout
        .write_all(payload.as_bytes())
        .and_then(|_| stdout.flush())
    {
        eprintln!("gcp-secret-env fetcher: failed to write payload: {}", e);
        return 1;
    }

    0
}

/// Run the fetcher and exit the process with its status.
pub fn run_and_exit() -> ! {
    std::process::exit(run())
}
