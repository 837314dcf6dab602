//! Wire format between the supervisor and the fetcher child.
//!
//! The child's stdout is free-form log lines, then the sentinel line, then
//! one line of JSON mapping environment keys to values:
//!
//! ```text
//! INFO Loaded 2 of 2 secret(s) from project demo
//! __GCP_SECRET_ENV_PAYLOAD_7d1f3c__
//! {"API_KEY":"...","GOOGLE_PROJECT_ID":"demo"}
//! ```

use crate::resolver::LoadedSecrets;

/// Delimits the log segment from the JSON payload
pub const SENTINEL: &str = "__GCP_SECRET_ENV_PAYLOAD_7d1f3c__";

/// Why captured child output could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("fetcher output does not contain the payload marker")]
    MissingSentinel,

    #[error("fetcher payload is not a JSON object of strings: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Successfully decoded child output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded<'a> {
    /// Non-empty lines preceding the sentinel
    pub log_lines: Vec<&'a str>,

    /// Parsed payload
    pub secrets: LoadedSecrets,
}

/// Render the sentinel and payload, newline-terminated.
pub fn encode(secrets: &LoadedSecrets) -> serde_json::Result<String> {
    let json = serde_json::to_string(secrets)?;
    Ok(format!("{}\n{}\n", SENTINEL, json))
}

/// Split on the first sentinel and parse everything after it.
///
/// Nothing is returned unless the whole payload parses.
pub fn decode(output: &str) -> Result<Decoded<'_>, ProtocolError> {
    let (logs, payload) = output
        .split_once(SENTINEL)
        .ok_or(ProtocolError::MissingSentinel)?;

    let secrets: LoadedSecrets = serde_json::from_str(payload.trim())?;
    let log_lines = logs
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect();

    Ok(Decoded { log_lines, secrets })
}
