//! Supervisor: runs the fetcher child and merges its result.
//!
//! The wait is blocking. It happens on a dedicated thread with its own
//! runtime, so callers may be plain synchronous code or already inside a
//! tokio runtime.
//!
//! No failure here is fatal to the caller. Every terminal state is logged and
//! returned as a [`PreloadOutcome`]; the environment is only written after
//! the whole payload has parsed.

use crate::config::{Config, FETCHER_ROLE_VAR, LOADED_GUARD_VAR};
use crate::env_store::{apply_secret, EnvStore};
use crate::protocol::{self, ProtocolError};
use crate::resolver::LoadedSecrets;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Target under which the child's log lines are re-emitted
pub const FETCHER_LOG_TARGET: &str = "gcp_secret_env::fetcher";

/// How to launch the fetcher child.
#[derive(Debug, Clone, Default)]
pub enum FetcherCommand {
    /// Re-execute the current binary; its startup must dispatch to the fetcher
    #[default]
    CurrentExe,

    /// An explicit program and arguments
    Program { program: PathBuf, args: Vec<OsString> },
}

impl FetcherCommand {
    pub fn program(program: impl Into<PathBuf>) -> Self {
        Self::Program {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument. No effect on [`FetcherCommand::CurrentExe`].
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        if let Self::Program { args, .. } = &mut self {
            args.push(arg.into());
        }
        self
    }

    fn build(&self) -> std::io::Result<Command> {
        match self {
            Self::CurrentExe => Ok(Command::new(std::env::current_exe()?)),
            Self::Program { program, args } => {
                let mut command = Command::new(program);
                command.args(args);
                Ok(command)
            }
        }
    }
}

/// Why the child produced no usable result.
#[derive(Debug, thiserror::Error)]
pub enum ChildError {
    #[error("failed to launch fetcher: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("fetcher exited with {}", exit_code_label(.0))]
    Exit(Option<i32>),

    #[error("fetcher did not finish within {0:?}")]
    Timeout(Duration),

    #[error("failed to collect fetcher output: {0}")]
    Io(#[source] std::io::Error),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// Counts from merging a payload into the environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Keys written
    pub applied: usize,
    /// Keys left alone because they were already set
    pub skipped: usize,
}

/// Terminal state of one supervisor run.
#[derive(Debug)]
pub enum PreloadOutcome {
    /// The guard was present; nothing was done
    AlreadyLoaded,
    /// The payload was merged and the guard set
    Loaded(MergeReport),
    /// Launch failure, non-zero exit, or timeout
    ChildError(ChildError),
    /// The child exited cleanly but its output was unusable
    ParseError(ProtocolError),
}

impl PreloadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_) | Self::AlreadyLoaded)
    }
}

impl std::fmt::Display for PreloadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyLoaded => write!(f, "secrets were already loaded"),
            Self::Loaded(report) => write!(
                f,
                "loaded {} variable(s), {} already set",
                report.applied, report.skipped
            ),
            Self::ChildError(e) => write!(f, "{}", e),
            Self::ParseError(e) => write!(f, "{}", e),
        }
    }
}

/// Merge a decoded payload under the precedence rule.
pub fn merge_secrets(
    env: &dyn EnvStore,
    secrets: &LoadedSecrets,
    override_existing: bool,
) -> MergeReport {
    let mut report = MergeReport::default();
    for (key, value) in secrets {
        if apply_secret(env, key, value, override_existing) {
            report.applied += 1;
        } else {
            report.skipped += 1;
        }
    }
    report
}

/// Launches the fetcher, waits for it, and merges its payload.
pub struct Supervisor<'a> {
    config: Config,
    env: &'a dyn EnvStore,
    command: FetcherCommand,
}

impl<'a> Supervisor<'a> {
    pub fn new(config: Config, env: &'a dyn EnvStore, command: FetcherCommand) -> Self {
        Self {
            config,
            env,
            command,
        }
    }

    /// Run to a terminal state.
    pub fn run(&self) -> PreloadOutcome {
        if self.env.has(LOADED_GUARD_VAR) {
            debug!("{} is set, secrets already loaded", LOADED_GUARD_VAR);
            return PreloadOutcome::AlreadyLoaded;
        }

        let output = match self.spawn_and_wait() {
            Ok(output) => output,
            Err(e) => {
                error!("Secrets not loaded: {}", e);
                return PreloadOutcome::ChildError(e);
            }
        };

        let decoded = match protocol::decode(&output) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!("Secrets not loaded: {}", e);
                if matches!(e, ProtocolError::MissingSentinel) {
                    for line in output.lines().filter(|l| !l.trim().is_empty()) {
                        debug!(target: FETCHER_LOG_TARGET, "{}", line);
                    }
                }
                return PreloadOutcome::ParseError(e);
            }
        };

        for line in &decoded.log_lines {
            info!(target: FETCHER_LOG_TARGET, "{}", line);
        }

        let report = merge_secrets(self.env, &decoded.secrets, self.config.override_existing);
        self.env.set(LOADED_GUARD_VAR, "true");

        info!(
            "Loaded {} variable(s) into the environment ({} already set)",
            report.applied, report.skipped
        );
        PreloadOutcome::Loaded(report)
    }

    fn spawn_and_wait(&self) -> Result<String, ChildError> {
        let mut command = self.command.build().map_err(ChildError::Spawn)?;
        command
            .env_clear()
            .envs(self.env.vars_os())
            .env(FETCHER_ROLE_VAR, "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let timeout = self.config.supervisor_timeout();
        debug!("Launching fetcher, waiting up to {:?}", timeout);

        std::thread::scope(|scope| {
            scope
                .spawn(move || wait_for_child(command, timeout))
                .join()
                .unwrap_or_else(|_| {
                    Err(ChildError::Io(std::io::Error::other(
                        "fetcher wait thread panicked",
                    )))
                })
        })
    }
}

/// Spawn the child and collect its stdout, bounded by `timeout` overall.
fn wait_for_child(mut command: Command, timeout: Duration) -> Result<String, ChildError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(ChildError::Io)?;

    runtime.block_on(async move {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut child = command.spawn().map_err(ChildError::Spawn)?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ChildError::Io(std::io::Error::other("fetcher stdout not captured")))?;
        let reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await.map(|_| buf)
        });

        let status = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => status.map_err(ChildError::Io)?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out fetcher: {}", e);
                }
                reader.abort();
                return Err(ChildError::Timeout(timeout));
            }
        };

        if !status.success() {
            reader.abort();
            return Err(ChildError::Exit(status.code()));
        }

        let bytes = match tokio::time::timeout_at(deadline, reader).await {
            Ok(Ok(read)) => read.map_err(ChildError::Io)?,
            Ok(Err(join)) => return Err(ChildError::Io(std::io::Error::other(join))),
            Err(_) => return Err(ChildError::Timeout(timeout)),
        };

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    })
}
