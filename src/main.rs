// GCP Secret Env - load Secret Manager secrets into a command's environment
//
// This is the main entry point for the command line tool.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gcp_secret_env::config::{
    Config, AUTO_DISCOVER_VAR, DEBUG_VAR, FILE_VAR, NAMES_VAR, OVERRIDE_VAR, PREFIX_VAR,
    TIMEOUT_VAR,
};
use gcp_secret_env::env_store::{EnvStore, ProcessEnv};
use gcp_secret_env::secrets_file::{self, SecretsFile};
use gcp_secret_env::store::auth;
use gcp_secret_env::store::gcp::{ACCESS_TOKEN_VAR, CREDENTIALS_VAR, PROJECT_VARS};
use gcp_secret_env::store::{GcpSecretManager, SecretStore};
use gcp_secret_env::{fetcher, logging, preload};
use std::path::{Path, PathBuf};

/// GCP Secret Env - load Google Cloud Secret Manager secrets into the environment
#[derive(Parser, Debug)]
#[command(name = "gcp-secret-env")]
#[command(version)]
#[command(about = "Load Google Cloud Secret Manager secrets into the environment", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check prerequisites and configuration
    Doctor,

    /// Load secrets, then run a command with them in its environment
    Run {
        #[command(flatten)]
        load: LoadArgs,

        /// Fail instead of running the command when secrets cannot be loaded
        #[arg(long, default_value = "false")]
        require: bool,

        /// Command to run, followed by its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Fetch secrets and print the raw supervisor payload
    Fetch {
        #[command(flatten)]
        load: LoadArgs,
    },
}

/// Flags mirroring the GCP_SECRETS_* variables; set flags win.
#[derive(Args, Debug)]
struct LoadArgs {
    /// Comma-separated secret names
    #[arg(long, value_name = "NAMES")]
    secrets: Option<String>,

    /// JSON file listing secret names
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Prefix prepended to every variable name
    #[arg(long)]
    prefix: Option<String>,

    /// Replace variables that are already set
    #[arg(long, default_value = "false")]
    override_existing: bool,

    /// Timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout: Option<u64>,

    /// Don't look for a .gcp-secrets.json in parent directories
    #[arg(long, default_value = "false")]
    no_discover: bool,

    /// Enable debug logging
    #[arg(long, default_value = "false")]
    debug: bool,
}

impl LoadArgs {
    /// Export flags as variables so the fetcher child inherits them.
    fn export(&self, env: &dyn EnvStore) {
        if let Some(names) = &self.secrets {
            env.set(NAMES_VAR, names);
        }
        if let Some(file) = &self.file {
            env.set(FILE_VAR, &file.to_string_lossy());
        }
        if let Some(prefix) = &self.prefix {
            env.set(PREFIX_VAR, prefix);
        }
        if self.override_existing {
            env.set(OVERRIDE_VAR, "true");
        }
        if let Some(timeout) = self.timeout {
            env.set(TIMEOUT_VAR, &timeout.to_string());
        }
        if self.no_discover {
            env.set(AUTO_DISCOVER_VAR, "false");
        }
        if self.debug {
            env.set(DEBUG_VAR, "true");
        }
    }
}

fn check_binary(name: &str) -> bool {
    which::which(name).is_ok()
}

fn check_file_exists(path: &str) -> bool {
    Path::new(path).exists()
}

fn run_doctor() -> Result<()> {
    println!("🔍 GCP Secret Env Doctor");
    println!("Checking prerequisites...\n");

    let env = ProcessEnv;
    let config = Config::from_env(&env);
    let gcloud_installed = check_binary("gcloud");
    let mut all_checks_passed = true;

    // Check 1: gcloud installation
    print!("1. Checking if 'gcloud' is installed... ");
    if gcloud_installed {
        println!("✓");
    } else if env.has(ACCESS_TOKEN_VAR) {
        println!("⊘");
        println!("   ⚠️  Not installed, using ${} instead", ACCESS_TOKEN_VAR);
    } else {
        println!("✗");
        println!("   ❌ 'gcloud' is not installed or not in PATH");
        println!("   📦 Install from: https://cloud.google.com/sdk/docs/install");
        all_checks_passed = false;
    }

    // Check 2: project id resolution
    print!("2. Resolving Google Cloud project id... ");
    let store = GcpSecretManager::from_env(&env).context("Failed to create Secret Manager client")?;
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    match runtime.block_on(store.project_id()) {
        Ok(project) => println!("✓ ({})", project),
        Err(e) => {
            println!("✗");
            println!("   ❌ {}", e);
            println!(
                "   💡 Set it with: export {}=<project-id>",
                PROJECT_VARS[0]
            );
            all_checks_passed = false;
        }
    }

    // Check 3: credentials
    print!("3. Checking credentials... ");
    if env.has(ACCESS_TOKEN_VAR) {
        println!("✓ (${})", ACCESS_TOKEN_VAR);
    } else if let Some(key_file) = env.get(CREDENTIALS_VAR) {
        if check_file_exists(&key_file) {
            println!("✓ (${})", CREDENTIALS_VAR);
        } else {
            println!("✗");
            println!("   ❌ File not found: {}", key_file);
            println!("   💡 Verify the path in ${}", CREDENTIALS_VAR);
            all_checks_passed = false;
        }
    } else if let Some(path) = auth::well_known_credentials_file(&env) {
        println!("✓ ({})", path.display());
    } else if gcloud_installed {
        println!("✓ (gcloud)");
    } else {
        println!("⊘");
        println!("   ⚠️  Relying on the metadata server (only works on Google Cloud)");
    }

    // Check 4: secret name source
    print!("4. Checking secret name source... ");
    if let Some(names) = &config.secret_names {
        println!("✓ ({} name(s) from ${})", names.len(), NAMES_VAR);
    } else if let Some(path) = &config.secret_names_path {
        match SecretsFile::load(path) {
            Ok(file) => println!(
                "✓ ({} name(s) from {})",
                file.secrets.map(|s| s.len()).unwrap_or(0),
                path.display()
            ),
            Err(e) => {
                println!("✗");
                println!("   ❌ {}", e);
                all_checks_passed = false;
            }
        }
    } else {
        let discovered = if config.auto_discover {
            std::env::current_dir()
                .ok()
                .and_then(|dir| secrets_file::discover(&dir))
        } else {
            None
        };
        match discovered {
            Some(path) => println!("✓ ({})", path.display()),
            None => {
                println!("⊘");
                println!("   ⚠️  No names configured, every secret in the project will be loaded");
            }
        }
    }

    println!();
    if all_checks_passed {
        println!("✅ All checks passed! Your system is ready.");
        Ok(())
    } else {
        println!("❌ Some checks failed. Please fix the issues above.");
        Err(anyhow::anyhow!("Doctor checks failed"))
    }
}

fn run_with_secrets(load: &LoadArgs, require: bool, command: &[String]) -> Result<i32> {
    let env = ProcessEnv;
    load.export(&env);
    logging::init_cli(Config::from_env(&env).debug);

    let outcome = preload::init();
    if require && !outcome.is_loaded() {
        anyhow::bail!("Secrets were not loaded: {}", outcome);
    }

    let (program, args) = command.split_first().context("No command given")?;
    let status = std::process::Command::new(program)
        .args(args)
        .status()
        .with_context(|| format!("Failed to run '{}'", program))?;

    Ok(status.code().unwrap_or(1))
}

fn main() -> Result<()> {
    // The supervisor re-executes this binary as the fetcher
    if fetcher::is_fetcher_process() {
        fetcher::run_and_exit();
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Doctor => {
            if let Err(e) = run_doctor() {
                eprintln!("\nError: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Run {
            load,
            require,
            command,
        } => match run_with_secrets(&load, require, &command) {
            Ok(code) => std::process::exit(code),
            Err(e) => {
                eprintln!("\nError: {:#}", e);
                eprintln!("\n💡 Run 'gcp-secret-env doctor' to check your configuration.");
                std::process::exit(1);
            }
        },
        Commands::Fetch { load } => {
            load.export(&ProcessEnv);
            std::process::exit(fetcher::run());
        }
    }

    Ok(())
}
