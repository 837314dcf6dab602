//! Supervisor tests driving scripted fetcher children through /bin/sh.

#![cfg(unix)]

mod common;

use common::{count_lines, host_env, TestContext};
use gcp_secret_env::config::{ConfigOverrides, LOADED_GUARD_VAR};
use gcp_secret_env::protocol::SENTINEL;
use gcp_secret_env::supervisor::{ChildError, MergeReport};
use gcp_secret_env::{Config, EnvStore, FetcherCommand, PreloadOutcome, ProcessEnv, Supervisor};
use serial_test::serial;
use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::time::{Duration, Instant};

fn shell(script: &str) -> FetcherCommand {
    FetcherCommand::program("/bin/sh").arg("-c").arg(script)
}

/// A script printing some log lines, the sentinel and `json`.
fn payload_script(json: &str) -> String {
    format!(
        "printf '%s\\n' 'INFO fetching secrets' 'INFO done' '{}' '{}'",
        SENTINEL, json
    )
}

fn with_timeout(ms: u64) -> Config {
    Config::default().with_overrides(ConfigOverrides {
        timeout_ms: Some(ms),
        ..ConfigOverrides::default()
    })
}

#[test]
fn test_successful_payload_is_merged() {
    let env = host_env();
    let script = payload_script(r#"{"DB_URL":"postgres://db","GOOGLE_PROJECT_ID":"demo"}"#);

    let outcome = Supervisor::new(Config::default(), &env, shell(&script)).run();

    assert!(matches!(
        outcome,
        PreloadOutcome::Loaded(MergeReport {
            applied: 2,
            skipped: 0
        })
    ));
    assert_eq!(env.get("DB_URL").as_deref(), Some("postgres://db"));
    assert_eq!(env.get("GOOGLE_PROJECT_ID").as_deref(), Some("demo"));
    assert_eq!(env.get(LOADED_GUARD_VAR).as_deref(), Some("true"));
}

#[test]
fn test_existing_values_are_preserved() {
    let env = host_env();
    env.set("DB_URL", "local");
    let script = payload_script(r#"{"DB_URL":"remote","API_KEY":"k"}"#);

    let outcome = Supervisor::new(Config::default(), &env, shell(&script)).run();

    assert!(outcome.is_loaded());
    assert_eq!(env.get("DB_URL").as_deref(), Some("local"));
    assert_eq!(env.get("API_KEY").as_deref(), Some("k"));
}

#[test]
fn test_override_replaces_existing_values() {
    let env = host_env();
    env.set("DB_URL", "local");
    let config = Config::default().with_overrides(ConfigOverrides {
        override_existing: Some(true),
        ..ConfigOverrides::default()
    });
    let script = payload_script(r#"{"DB_URL":"remote"}"#);

    Supervisor::new(config, &env, shell(&script)).run();

    assert_eq!(env.get("DB_URL").as_deref(), Some("remote"));
}

#[test]
fn test_child_receives_environment_and_role_marker() {
    let env = host_env();
    env.set("SEED", "from-parent");
    let script = format!(
        r#"printf '%s\n' '{}' "{{\"SEEN\":\"$SEED\",\"ROLE\":\"$GCP_SECRETS_FETCHER\"}}""#,
        SENTINEL
    );

    let outcome = Supervisor::new(Config::default(), &env, shell(&script)).run();

    assert!(outcome.is_loaded());
    assert_eq!(env.get("SEEN").as_deref(), Some("from-parent"));
    assert_eq!(env.get("ROLE").as_deref(), Some("1"));
    assert!(!env.has("GCP_SECRETS_FETCHER"));
}

#[test]
fn test_missing_sentinel_leaves_env_untouched() {
    let env = host_env();
    env.set("A", "local");
    let before = env.snapshot();

    let outcome = Supervisor::new(
        Config::default(),
        &env,
        shell(r#"printf '%s\n' 'INFO no payload' '{"A":"remote"}'"#),
    )
    .run();

    assert!(matches!(outcome, PreloadOutcome::ParseError(_)));
    assert_eq!(env.snapshot(), before);
}

#[test]
fn test_truncated_payload_leaves_env_untouched() {
    let env = host_env();
    let before = env.snapshot();
    let script = payload_script(r#"{"A":"1","B":"#);

    let outcome = Supervisor::new(Config::default(), &env, shell(&script)).run();

    assert!(matches!(outcome, PreloadOutcome::ParseError(_)));
    assert_eq!(env.snapshot(), before);
}

#[test]
fn test_non_zero_exit_discards_output() {
    let env = host_env();
    let before = env.snapshot();
    let script = format!("{}; exit 3", payload_script(r#"{"A":"1"}"#));

    let outcome = Supervisor::new(Config::default(), &env, shell(&script)).run();

    assert!(matches!(
        outcome,
        PreloadOutcome::ChildError(ChildError::Exit(Some(3)))
    ));
    assert_eq!(env.snapshot(), before);
}

#[test]
fn test_hung_child_times_out() {
    let env = host_env();
    let before = env.snapshot();

    let started = Instant::now();
    let outcome = Supervisor::new(with_timeout(300), &env, shell("exec sleep 10")).run();

    assert!(matches!(
        outcome,
        PreloadOutcome::ChildError(ChildError::Timeout(_))
    ));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(env.snapshot(), before);
}

#[test]
fn test_second_run_does_not_spawn_again() {
    let ctx = TestContext::new().unwrap();
    let counter = ctx.path("spawns.log");
    let env = host_env();
    let script = format!(
        "echo spawned >> '{}'; {}",
        counter.display(),
        payload_script(r#"{"A":"1"}"#)
    );

    let first = Supervisor::new(Config::default(), &env, shell(&script)).run();
    let second = Supervisor::new(Config::default(), &env, shell(&script)).run();

    assert!(matches!(first, PreloadOutcome::Loaded(_)));
    assert!(matches!(second, PreloadOutcome::AlreadyLoaded));
    assert_eq!(count_lines(&counter), 1);
}

#[test]
fn test_failed_run_can_be_retried() {
    let env = host_env();

    let failed = Supervisor::new(Config::default(), &env, shell("exit 1")).run();
    let retried = Supervisor::new(
        Config::default(),
        &env,
        shell(&payload_script(r#"{"A":"1"}"#)),
    )
    .run();

    assert!(!failed.is_loaded());
    assert!(matches!(retried, PreloadOutcome::Loaded(_)));
    assert_eq!(env.get("A").as_deref(), Some("1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_runs_inside_async_runtime() {
    let env = host_env();
    let script = payload_script(r#"{"A":"1"}"#);

    let outcome = Supervisor::new(Config::default(), &env, shell(&script)).run();

    assert!(outcome.is_loaded());
}

#[test]
#[serial]
fn test_child_inherits_non_utf8_process_variables() {
    std::env::remove_var(LOADED_GUARD_VAR);
    std::env::set_var("GSE_RAW_VALUE", OsString::from_vec(vec![b'x', 0xff]));
    let script = format!(
        "[ -n \"$GSE_RAW_VALUE\" ] || exit 9; {}",
        payload_script(r#"{"GSE_RAW_SEEN":"yes"}"#)
    );

    let outcome = Supervisor::new(Config::default(), &ProcessEnv, shell(&script)).run();
    let seen = std::env::var("GSE_RAW_SEEN");

    for var in ["GSE_RAW_VALUE", "GSE_RAW_SEEN", LOADED_GUARD_VAR] {
        std::env::remove_var(var);
    }

    assert!(outcome.is_loaded(), "unexpected outcome: {}", outcome);
    assert_eq!(seen.as_deref(), Ok("yes"));
}
