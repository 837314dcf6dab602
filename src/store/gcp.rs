//! Google Cloud Secret Manager integration using the REST API.
//!
//! # Project Detection Order
//!
//! 1. `GOOGLE_CLOUD_PROJECT`, `GCLOUD_PROJECT`, `GCP_PROJECT`
//! 2. `project_id` in the `GOOGLE_APPLICATION_CREDENTIALS` key file
//! 3. `gcloud config get-value project`
//! 4. The GCE metadata server
//!
//! # Access Token Order
//!
//! 1. `GOOGLE_OAUTH_ACCESS_TOKEN`
//! 2. The `GOOGLE_APPLICATION_CREDENTIALS` file, or the gcloud
//!    application-default credentials file (see [`super::auth`])
//! 3. `gcloud auth print-access-token`
//! 4. The GCE metadata server (default service account)
//!
//! # Security
//!
//! - Secret values and tokens are never logged

use super::auth;
use super::SecretStore;
use crate::env_store::EnvStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Public Secret Manager endpoint
pub const DEFAULT_ENDPOINT: &str = "https://secretmanager.googleapis.com";

/// Overrides the Secret Manager base URL
pub const ENDPOINT_VAR: &str = "GCP_SECRETS_API_ENDPOINT";

/// Static bearer token, skips every other token source
pub const ACCESS_TOKEN_VAR: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Variables consulted for the project id, in order
pub const PROJECT_VARS: [&str; 3] = ["GOOGLE_CLOUD_PROJECT", "GCLOUD_PROJECT", "GCP_PROJECT"];

/// Credentials file used for tokens and as a project id source
pub const CREDENTIALS_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";
const METADATA_ENDPOINT: &str = "http://metadata.google.internal/computeMetadata/v1";
const METADATA_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const LIST_PAGE_SIZE: &str = "250";

/// Secret Manager client.
pub struct GcpSecretManager {
    http: reqwest::Client,
    endpoint: String,
    metadata_endpoint: String,
    project_hint: Option<String>,
    credentials_path: Option<PathBuf>,
    static_token: Option<String>,
    use_gcloud: bool,
    token: OnceCell<String>,
}

impl std::fmt::Debug for GcpSecretManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpSecretManager")
            .field("endpoint", &self.endpoint)
            .field("project_hint", &self.project_hint)
            .field("credentials_path", &self.credentials_path)
            .field("use_gcloud", &self.use_gcloud)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Deserialize)]
struct AccessResponse {
    payload: Option<AccessPayload>,
}

#[derive(Deserialize)]
struct AccessPayload {
    data: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    secrets: Vec<SecretResource>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct SecretResource {
    name: String,
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
}

#[derive(Deserialize)]
struct CredentialsFile {
    project_id: Option<String>,
}

impl GcpSecretManager {
    /// Create a client that discovers everything from Google Cloud defaults.
    pub fn new() -> Result<Self> {
        auth::install_crypto_provider();
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            http,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            metadata_endpoint: METADATA_ENDPOINT.to_string(),
            project_hint: None,
            credentials_path: None,
            static_token: None,
            use_gcloud: true,
            token: OnceCell::new(),
        })
    }

    /// Create a client configured from environment variables.
    pub fn from_env(env: &dyn EnvStore) -> Result<Self> {
        let mut store = Self::new()?;

        if let Some(endpoint) = non_empty(env.get(ENDPOINT_VAR)) {
            store = store.with_endpoint(endpoint);
        }
        store.project_hint = PROJECT_VARS
            .iter()
            .find_map(|var| non_empty(env.get(var)));
        store.credentials_path = non_empty(env.get(CREDENTIALS_VAR))
            .map(PathBuf::from)
            .or_else(|| auth::well_known_credentials_file(env));
        store.static_token = non_empty(env.get(ACCESS_TOKEN_VAR));

        Ok(store)
    }

    /// Use a different Secret Manager base URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Use a different metadata server base URL.
    pub fn with_metadata_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.metadata_endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Pin the project id.
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_hint = Some(project_id.into());
        self
    }

    /// Pin the bearer token.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.static_token = Some(token.into());
        self
    }

    /// Authenticate with a credentials file.
    pub fn with_credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    /// Never shell out to the gcloud CLI.
    pub fn without_gcloud(mut self) -> Self {
        self.use_gcloud = false;
        self
    }

    async fn access_token(&self) -> Result<&str> {
        let token = self
            .token
            .get_or_try_init(|| async {
                if let Some(token) = &self.static_token {
                    return Ok(token.clone());
                }

                if let Some(path) = &self.credentials_path {
                    match auth::token_from_file(path).await {
                        Ok(token) => return Ok(token),
                        Err(e) => warn!("{}, trying other token sources", e),
                    }
                }

                if self.use_gcloud {
                    match run_gcloud(&["auth", "print-access-token"]).await {
                        Ok(Some(token)) => return Ok(token),
                        Ok(None) => debug!("gcloud returned no access token"),
                        Err(e) => debug!("gcloud access token unavailable: {}", e),
                    }
                }

                let url = format!(
                    "{}/instance/service-accounts/default/token",
                    self.metadata_endpoint
                );
                match self.metadata_get(&url).await {
                    Ok(body) => serde_json::from_str::<MetadataToken>(&body)
                        .map(|t| t.access_token)
                        .map_err(|e| Error::Auth(format!("invalid metadata token response: {}", e))),
                    Err(e) => Err(Error::Auth(format!(
                        "set {} or {}, log in with `gcloud auth login`, or run on Google Cloud ({})",
                        ACCESS_TOKEN_VAR, CREDENTIALS_VAR, e
                    ))),
                }
            })
            .await?;

        Ok(token.as_str())
    }

    async fn metadata_get(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .header("Metadata-Flavor", "Google")
            .timeout(METADATA_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                resource: url.to_string(),
                message: body,
            });
        }

        Ok(body.trim().to_string())
    }

    async fn project_from_credentials(&self) -> Option<String> {
        let path = self.credentials_path.as_ref()?;
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                debug!("Cannot read credentials file {:?}: {}", path, e);
                return None;
            }
        };

        serde_json::from_str::<CredentialsFile>(&content)
            .ok()
            .and_then(|c| non_empty(c.project_id))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        resource: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let token = self.access_token().await?;
        let url = format!("{}/v1/{}", self.endpoint, resource);

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                resource: resource.to_string(),
                message: api_error_message(&body),
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl SecretStore for GcpSecretManager {
    async fn project_id(&self) -> Result<String> {
        if let Some(project) = &self.project_hint {
            return Ok(project.clone());
        }

        if let Some(project) = self.project_from_credentials().await {
            return Ok(project);
        }

        if self.use_gcloud {
            match run_gcloud(&["config", "get-value", "project"]).await {
                Ok(Some(project)) if project != "(unset)" => return Ok(project),
                Ok(_) => debug!("gcloud has no default project"),
                Err(e) => debug!("gcloud project lookup failed: {}", e),
            }
        }

        let url = format!("{}/project/project-id", self.metadata_endpoint);
        match self.metadata_get(&url).await {
            Ok(project) if !project.is_empty() => Ok(project),
            Ok(_) => Err(Error::ProjectId("metadata server returned an empty project id".to_string())),
            Err(e) => Err(Error::ProjectId(format!(
                "set {} or run `gcloud config set project <id>` ({})",
                PROJECT_VARS[0], e
            ))),
        }
    }

    async fn access_secret(&self, project_id: &str, name: &str) -> Result<String> {
        let resource = format!(
            "projects/{}/secrets/{}/versions/latest:access",
            project_id, name
        );
        let response: AccessResponse = self.get_json(&resource, &[]).await?;

        let data = response
            .payload
            .and_then(|p| p.data)
            .ok_or_else(|| Error::Payload {
                name: name.to_string(),
                reason: "response has no payload data".to_string(),
            })?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data.as_bytes())
            .map_err(|e| Error::Payload {
                name: name.to_string(),
                reason: format!("invalid base64: {}", e),
            })?;

        String::from_utf8(bytes).map_err(|_| Error::Payload {
            name: name.to_string(),
            reason: "value is not valid UTF-8".to_string(),
        })
    }

    async fn list_secret_names(&self, project_id: &str) -> Result<Vec<String>> {
        let resource = format!("projects/{}/secrets", project_id);
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: ListResponse = {
                let mut query = vec![("pageSize", LIST_PAGE_SIZE)];
                if let Some(token) = page_token.as_deref() {
                    query.push(("pageToken", token));
                }
                self.get_json(&resource, &query).await?
            };
            names.extend(page.secrets.into_iter().filter_map(|secret| {
                secret
                    .name
                    .rsplit('/')
                    .next()
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
            }));

            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!("Listed {} secret(s) in project {}", names.len(), project_id);
        Ok(names)
    }
}

/// Run a gcloud command and return its trimmed stdout.
async fn run_gcloud(args: &[&str]) -> anyhow::Result<Option<String>> {
    which::which("gcloud")?;

    let output = Command::new("gcloud")
        .args(args)
        .stdin(std::process::Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "gcloud {} failed: {}",
            args.join(" "),
            if stderr.is_empty() {
                "Unknown error"
            } else {
                stderr.trim()
            }
        );
    }

    let stdout = String::from_utf8(output.stdout)?;
    Ok(non_empty(Some(stdout.trim().to_string())))
}

/// Pull `error.message` out of a Google API error body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            if body.is_empty() {
                "Unknown error".to_string()
            } else {
                body.to_string()
            }
        })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
