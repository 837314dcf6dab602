//! Tracing subscriber setup.
//!
//! The fetcher child logs to stdout so its lines precede the payload marker;
//! the CLI logs to stderr. `RUST_LOG` wins over the debug flag when set.

use tracing_subscriber::EnvFilter;

fn filter(debug: bool) -> EnvFilter {
    let default = if debug {
        "info,gcp_secret_env=debug"
    } else {
        "info,reqwest=warn"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Subscriber for the command line tool, writing to stderr.
pub fn init_cli(debug: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(debug))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

/// Subscriber for the fetcher child, writing plain lines to stdout.
pub fn init_fetcher(debug: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(debug))
        .with_writer(std::io::stdout)
        .with_ansi(false)
        .with_target(false)
        .without_time()
        .compact()
        .try_init();
}
