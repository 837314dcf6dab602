//! Error types for loading secrets.

use std::path::PathBuf;

/// Errors surfaced by the programmatic load path and the remote store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The ambient project id could not be determined
    #[error("Unable to resolve Google Cloud project id: {0}")]
    ProjectId(String),

    /// An explicitly configured secrets file could not be read
    #[error("Failed to read secrets file {path:?}: {source}")]
    SecretsFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An explicitly configured secrets file has an unsupported shape
    #[error(
        "Invalid secrets file {0:?}: expected a JSON array of names or an object with a \"secrets\" array"
    )]
    SecretsFileFormat(PathBuf),

    /// No usable access token could be obtained
    #[error("Failed to obtain Google Cloud access token: {0}")]
    Auth(String),

    /// Transport-level failure talking to Secret Manager
    #[error("Request to Secret Manager failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Secret Manager answered with a non-success status
    #[error("Secret Manager returned {status} for {resource}: {message}")]
    Api {
        status: u16,
        resource: String,
        message: String,
    },

    /// A secret version payload could not be decoded
    #[error("Secret {name} has an unreadable payload: {reason}")]
    Payload { name: String, reason: String },

    /// The overall resolve + fetch sequence exceeded its bound
    #[error("Loading secrets timed out after {0} ms")]
    Timeout(u64),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_message_names_resource() {
        let err = Error::Api {
            status: 404,
            resource: "projects/p/secrets/API_KEY".to_string(),
            message: "not found".to_string(),
        };

        let message = err.to_string();
        assert!(message.contains("404"));
        assert!(message.contains("API_KEY"));
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(
            Error::Timeout(5000).to_string(),
            "Loading secrets timed out after 5000 ms"
        );
    }
}
