//! Common testing utilities for GCP Secret Env integration tests.

use async_trait::async_trait;
use gcp_secret_env::{Error, MemoryEnv, Result, SecretStore};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Test context that manages temporary files and directories.
pub struct TestContext {
    /// Path to temporary directory
    pub temp_path: PathBuf,
    /// The temporary directory (kept to prevent early deletion)
    _temp_dir: TempDir,
}

impl TestContext {
    /// Create a new test context with a temporary directory.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let temp_path = temp_dir.path().to_path_buf();

        Ok(Self {
            temp_path,
            _temp_dir: temp_dir,
        })
    }

    /// Create a test file with content, creating parent directories.
    #[allow(dead_code)]
    pub fn create_file(&self, name: &str, content: &str) -> anyhow::Result<PathBuf> {
        let file_path = self.temp_path.join(name);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&file_path)?;
        file.write_all(content.as_bytes())?;
        Ok(file_path)
    }

    /// Create a nested directory and return its path.
    #[allow(dead_code)]
    pub fn create_dir(&self, name: &str) -> anyhow::Result<PathBuf> {
        let dir = self.temp_path.join(name);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Get the path to a file in the temp directory.
    #[allow(dead_code)]
    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_path.join(name)
    }
}

/// In-memory secret store with call counters and injectable failures.
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeStore {
    project: Option<String>,
    values: HashMap<String, String>,
    failing: HashSet<String>,
    listed: Option<Vec<String>>,
    fail_list: bool,
    delay: Option<Duration>,
    access_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

#[allow(dead_code)]
impl FakeStore {
    pub fn new(project: &str) -> Self {
        Self {
            project: Some(project.to_string()),
            ..Self::default()
        }
    }

    /// A store whose project id cannot be resolved.
    pub fn without_project() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: &str, value: &str) -> Self {
        self.values.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    /// Names returned by listing; defaults to every stored secret, sorted.
    pub fn with_listed(mut self, names: &[&str]) -> Self {
        self.listed = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn with_failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    /// Delay applied to every secret access.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn access_calls(&self) -> usize {
        self.access_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for FakeStore {
    async fn project_id(&self) -> Result<String> {
        self.project
            .clone()
            .ok_or_else(|| Error::ProjectId("no project configured".to_string()))
    }

    async fn access_secret(&self, _project_id: &str, name: &str) -> Result<String> {
        self.access_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.contains(name) {
            return Err(Error::Api {
                status: 503,
                resource: name.to_string(),
                message: "backend unavailable".to_string(),
            });
        }

        self.values.get(name).cloned().ok_or_else(|| Error::Api {
            status: 404,
            resource: name.to_string(),
            message: "not found".to_string(),
        })
    }

    async fn list_secret_names(&self, _project_id: &str) -> Result<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list {
            return Err(Error::Api {
                status: 403,
                resource: "secrets".to_string(),
                message: "permission denied".to_string(),
            });
        }

        Ok(self.listed.clone().unwrap_or_else(|| {
            let mut names: Vec<String> = self.values.keys().cloned().collect();
            names.sort();
            names
        }))
    }
}

/// Environment seeded with the host PATH so child shells find their tools.
#[allow(dead_code)]
pub fn host_env() -> MemoryEnv {
    let env = MemoryEnv::new();
    if let Ok(path) = std::env::var("PATH") {
        gcp_secret_env::EnvStore::set(&env, "PATH", &path);
    }
    env
}

/// Read a file that may not exist yet as a line count.
#[allow(dead_code)]
pub fn count_lines(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|content| content.lines().count())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_context_create_file() {
        let ctx = TestContext::new().unwrap();
        let file_path = ctx.create_file("nested/test.txt", "Hello, World!").unwrap();

        assert!(file_path.exists());
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "Hello, World!");
    }

    #[tokio::test]
    async fn test_fake_store_lists_stored_names() {
        let store = FakeStore::new("p").with_secret("B", "2").with_secret("A", "1");

        assert_eq!(store.list_secret_names("p").await.unwrap(), vec!["A", "B"]);
        assert_eq!(store.list_calls(), 1);
    }
}
