//! Remote secret store integration.
//!
//! # Supported Platforms
//!
//! - Google Cloud Secret Manager (REST API)

pub mod auth;
pub mod gcp;

use crate::error::Result;
use async_trait::async_trait;

pub use gcp::GcpSecretManager;

/// The three operations loading needs from a remote secret store.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Resolve the ambient project id from the store's authentication context.
    async fn project_id(&self) -> Result<String>;

    /// Fetch the latest value of a secret.
    async fn access_secret(&self, project_id: &str, name: &str) -> Result<String>;

    /// List the names of every secret registered in the project.
    async fn list_secret_names(&self, project_id: &str) -> Result<Vec<String>>;
}
