mod askpass;
mod checkout;
mod serve;
mod terminal;
mod token;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use trampoline_config::{AppConfig, PinnedHost};
use trampoline_core::env;

const CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Parser)]
#[command(
    name = "trampoline",
    version,
    about = "Answers git and ssh credential prompts for headless subprocesses"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Listen on the configured socket and answer prompts at this terminal.
    Serve,
    /// Run `git checkout` with prompts routed through an in-process server.
    Checkout(checkout::CheckoutArgs),
    /// Pin an SSH host key so its prompt is answered without asking.
    Trust {
        #[arg(long)]
        host: String,
        /// Key fingerprint as ssh prints it, e.g. `SHA256:...`.
        #[arg(long)]
        fingerprint: String,
    },
    /// Manage tokens in the file-backed token store.
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Debug, Subcommand)]
enum TokenCommands {
    /// Store a token read from stdin.
    Set {
        #[arg(long)]
        endpoint: String,
        #[arg(long)]
        username: String,
    },
    /// Print a stored token.
    Get {
        #[arg(long)]
        endpoint: String,
        #[arg(long)]
        username: String,
    },
    Delete {
        #[arg(long)]
        endpoint: String,
        #[arg(long)]
        username: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // git and ssh run us as their askpass program inside the repository;
    // stdout is the answer and the repository's .env is not ours to load.
    if std::env::var(env::HELPER).ok().as_deref() == Some("askpass") {
        init_tracing("warn");
        std::process::exit(askpass::run_helper().await);
    }

    dotenvy::dotenv().ok();

    let config = AppConfig::load_from(CONFIG_PATH)?;
    init_tracing(&config.telemetry.log_level);
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => serve::run(&config).await,
        Commands::Checkout(args) => checkout::run(&config, args).await,
        Commands::Trust { host, fingerprint } => {
            let mut config = config;
            if pin_host(&mut config, host, fingerprint) {
                config.save_to(CONFIG_PATH)?;
                println!("host key pinned in {CONFIG_PATH}");
            } else {
                println!("host key already pinned");
            }
            Ok(())
        }
        Commands::Token { command } => {
            let store = token::store(&config);
            let prefix = &config.credentials.key_prefix;
            match command {
                TokenCommands::Set { endpoint, username } => {
                    token::set(&store, prefix, &endpoint, &username).await
                }
                TokenCommands::Get { endpoint, username } => {
                    token::get(&store, prefix, &endpoint, &username).await
                }
                TokenCommands::Delete { endpoint, username } => {
                    token::delete(&store, prefix, &endpoint, &username).await
                }
            }
        }
    }
}

/// Logs go to stderr: stdout carries helper answers and command output.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `false` when the pair is already pinned.
fn pin_host(config: &mut AppConfig, host: String, fingerprint: String) -> bool {
    let pinned = PinnedHost { host, fingerprint };
    if config.trust.pinned_hosts.contains(&pinned) {
        return false;
    }
    config.trust.pinned_hosts.push(pinned);
    true
}

pub(crate) fn helper_path(config: &AppConfig) -> Result<PathBuf> {
    if config.trampoline.helper_path.is_empty() {
        Ok(std::env::current_exe()?)
    } else {
        Ok(PathBuf::from(&config.trampoline.helper_path))
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn token_set_parses() {
        let cli = Cli::try_parse_from([
            "trampoline",
            "token",
            "set",
            "--endpoint",
            "https://api.github.com",
            "--username",
            "octocat",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Token {
                command: TokenCommands::Set { .. }
            }
        ));
    }

    #[test]
    fn pinning_a_host_is_idempotent() {
        let mut config = AppConfig::default();
        let before = config.trust.pinned_hosts.len();
        assert!(pin_host(&mut config, "ghe.example.com".into(), "SHA256:AAAA".into()));
        assert!(!pin_host(&mut config, "ghe.example.com".into(), "SHA256:AAAA".into()));
        assert_eq!(config.trust.pinned_hosts.len(), before + 1);
    }

    #[test]
    fn explicit_helper_path_wins() {
        let mut config = AppConfig::default();
        config.trampoline.helper_path = "/opt/trampoline".into();
        assert_eq!(helper_path(&config).unwrap(), PathBuf::from("/opt/trampoline"));
    }
}
