//! GCP Secret Env - load Google Cloud Secret Manager secrets into the
//! process environment.
//!
//! This library provides two entry points:
//!
//! - [`preload::init`]: synchronous, for the very top of `main`. Fetching
//!   happens in a child process and the result is merged before returning.
//! - [`load`]: asynchronous, for programs that are already running a runtime.

pub mod config;
pub mod env_store;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod preload;
pub mod protocol;
pub mod resolver;
pub mod secrets_file;
pub mod store;
pub mod supervisor;

pub use config::{Config, ConfigOverrides};
pub use env_store::{EnvStore, MemoryEnv, ProcessEnv};
pub use error::{Error, Result};
pub use resolver::{load, load_secrets, LoadedSecrets, SecretResolver, PROJECT_ID_KEY};
pub use store::{GcpSecretManager, SecretStore};
pub use supervisor::{FetcherCommand, PreloadOutcome, Supervisor};
