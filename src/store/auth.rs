//! Access tokens from Application Default Credentials files.
//!
//! Handles the two file types Google tooling writes:
//!
//! - `service_account`: a key file, usually pointed to by
//!   `GOOGLE_APPLICATION_CREDENTIALS`
//! - `authorized_user`: written by `gcloud auth application-default login`

use crate::env_store::EnvStore;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// OAuth scope covering Secret Manager
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

#[derive(Deserialize)]
struct CredentialsKind {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Install ring as the process-wide rustls provider unless one is set.
pub fn install_crypto_provider() {
    use rustls::crypto::{ring, CryptoProvider};

    if CryptoProvider::get_default().is_none() {
        // Another thread may win the race; either provider works
        let _ = ring::default_provider().install_default();
    }
}

/// Location of the file written by `gcloud auth application-default login`.
pub fn well_known_credentials_file(env: &dyn EnvStore) -> Option<PathBuf> {
    let config_dir = if cfg!(windows) {
        PathBuf::from(env.get("APPDATA")?).join("gcloud")
    } else {
        PathBuf::from(env.get("HOME")?).join(".config").join("gcloud")
    };

    Some(config_dir.join("application_default_credentials.json")).filter(|path| path.is_file())
}

/// Mint an access token from a credentials file.
///
/// # Errors
///
/// Returns [`Error::Auth`] if the file is unreadable, of an unsupported
/// type, or the token exchange fails.
pub async fn token_from_file(path: &Path) -> Result<String> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| auth_error(path, e))?;

    let kind = serde_json::from_str::<CredentialsKind>(&content)
        .ok()
        .and_then(|c| c.kind)
        .unwrap_or_default();

    let token = match kind.as_str() {
        "service_account" => {
            let key =
                yup_oauth2::parse_service_account_key(&content).map_err(|e| auth_error(path, e))?;
            let auth = yup_oauth2::ServiceAccountAuthenticator::builder(key)
                .build()
                .await
                .map_err(|e| auth_error(path, e))?;
            auth.token(&[CLOUD_PLATFORM_SCOPE])
                .await
                .map_err(|e| auth_error(path, e))?
        }
        "authorized_user" => {
            let secret = yup_oauth2::read_authorized_user_secret(path)
                .await
                .map_err(|e| auth_error(path, e))?;
            let auth = yup_oauth2::AuthorizedUserAuthenticator::builder(secret)
                .build()
                .await
                .map_err(|e| auth_error(path, e))?;
            auth.token(&[CLOUD_PLATFORM_SCOPE])
                .await
                .map_err(|e| auth_error(path, e))?
        }
        other => {
            return Err(Error::Auth(format!(
                "unsupported credentials type '{}' in {:?}",
                other, path
            )))
        }
    };

    token
        .token()
        .map(str::to_string)
        .ok_or_else(|| Error::Auth(format!("credentials in {:?} produced no access token", path)))
}

fn auth_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Auth(format!("credentials file {:?}: {}", path, e))
}
