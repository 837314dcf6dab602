//! One-call startup hook.
//!
//! Call [`init`] first thing in `main`, before building any runtime or
//! reading configuration:
//!
//! ```no_run
//! fn main() {
//!     gcp_secret_env::preload::init();
//!
//!     // Secrets are in the environment from here on
//!     let _token = std::env::var("GITHUB_TOKEN");
//! }
//! ```
//!
//! The supervisor re-executes the current binary as the fetcher, marked by
//! `GCP_SECRETS_FETCHER`. In that child [`init`] runs the fetcher and exits,
//! so the rest of `main` never runs there.
//!
//! If no tracing subscriber is installed yet, a stderr one is, so failures
//! and the fetcher's log lines are visible. Install your own beforehand to
//! route them elsewhere.

use crate::config::Config;
use crate::env_store::ProcessEnv;
use crate::fetcher;
use crate::logging;
use crate::supervisor::{FetcherCommand, PreloadOutcome, Supervisor};

/// Load secrets into the process environment, blocking until done.
///
/// Never panics or fails the host; inspect the outcome if it matters.
pub fn init() -> PreloadOutcome {
    init_with_command(FetcherCommand::CurrentExe)
}

/// Like [`init`], launching the fetcher with an explicit command.
pub fn init_with_command(command: FetcherCommand) -> PreloadOutcome {
    if fetcher::is_fetcher_process() {
        fetcher::run_and_exit();
    }

    let env = ProcessEnv;
    let config = Config::from_env(&env);
    logging::init_cli(config.debug);

    Supervisor::new(config, &env, command).run()
}
