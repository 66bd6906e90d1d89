//! ManifestHub CLI - Command-line interface
//!
//! This binary drives the harvester against the archive repository in the
//! current working directory.
//!
//! # Architecture
//!
//! - `Cli` / `Mode`: argument parsing (clap)
//! - `CliError`: centralized error handling; every failure exits 1
//!
//! # Environment
//!
//! - `GITHUB_STEP_SUMMARY`: path the Markdown tracking report is appended
//!   to after a `download` run
//! - `RSA_PRIVATE_KEY`: PEM private key unsealing `account`-mode payloads

mod error;

use clap::{Parser, ValueEnum};
use error::CliError;
use manifesthub::archive::{ForgeAuth, GitStore};
use manifesthub::config::HarvestConfig;
use manifesthub::crypto::SecretKey;
use manifesthub::logging;
use manifesthub::orchestrator::Orchestrator;
use manifesthub::steam::WebSteamClient;
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// CLI Argument Definitions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Harvest manifests with the stored account pool
    Download,
    /// Ingest accounts from an external file
    Account,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Download => f.write_str("download"),
            Mode::Account => f.write_str("account"),
        }
    }
}

#[derive(Parser)]
#[command(name = "manifesthub")]
#[command(version = manifesthub::VERSION)]
#[command(about = "Steam depot manifest harvester", long_about = None)]
struct Cli {
    /// Run mode
    #[arg(value_enum, default_value_t = Mode::Download)]
    mode: Mode,

    /// Account ingestion file (account mode)
    #[arg(short = 'a', long = "account")]
    account: Option<PathBuf>,

    /// Forge access token, used as the push password
    #[arg(short = 't', long = "token")]
    token: String,

    /// Maximum concurrent Steam sessions
    #[arg(short = 'c', long = "concurrent-account", default_value_t = 4)]
    concurrent_account: usize,

    /// Maximum concurrent manifest downloads per session
    #[arg(short = 'p', long = "concurrent-manifest", default_value_t = 16)]
    concurrent_manifest: usize,

    /// Zero-based index of this instance (account mode)
    #[arg(short = 'i', long = "index", default_value_t = 0)]
    index: usize,

    /// Total number of parallel instances (account mode)
    #[arg(short = 'n', long = "number", default_value_t = 1)]
    number: usize,

    /// Base64-encoded 32-byte AES key for account secrets
    #[arg(short = 'k', long = "key")]
    key: String,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // clap exits 2 by default; the harvester's contract is 1.
            let _ = e.print();
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let _logging_guard = logging::init_logging(logging::default_log_dir(), logging::default_log_file())
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;

    let key = SecretKey::from_base64(&cli.key)
        .map_err(|e| CliError::Config(format!("invalid AES key: {e}")))?;

    let config = HarvestConfig::new()
        .with_concurrent_accounts(cli.concurrent_account)
        .with_concurrent_downloads(cli.concurrent_manifest);

    let store = GitStore::open(".", ForgeAuth::token(cli.token.clone()))
        .map_err(CliError::Repository)?;
    let orchestrator = Orchestrator::new(store, key, config, WebSteamClient::new);

    println!("ManifestHub v{}", manifesthub::VERSION);
    println!("===========");
    println!();
    println!("Mode:                 {}", cli.mode);
    println!("Concurrent accounts:  {}", cli.concurrent_account);
    println!("Concurrent manifests: {}", cli.concurrent_manifest);
    println!();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    runtime.block_on(async {
        match cli.mode {
            Mode::Download => {
                let summary_path = std::env::var_os("GITHUB_STEP_SUMMARY").map(PathBuf::from);
                let summary = orchestrator.run_download(summary_path.as_deref()).await?;

                println!("Accounts:           {}", summary.accounts);
                println!("Manifests archived: {}", summary.manifests_written);
                println!("Write failures:     {}", summary.write_failures);
                println!("Accounts removed:   {}", summary.removed_accounts);
                println!("Tags pruned:        {}", summary.pruned_tags);
            }
            Mode::Account => {
                let path = cli.account.ok_or_else(|| {
                    CliError::Config("account mode requires -a/--account FILE".to_string())
                })?;
                let pem = std::env::var("RSA_PRIVATE_KEY").ok();
                let summary = orchestrator
                    .run_account_mode(&path, cli.index, cli.number, pem.as_deref())
                    .await?;

                println!("Accounts assigned:  {}", summary.assigned);
                println!("Tokens refreshed:   {}", summary.refreshed);
                println!("Accounts removed:   {}", summary.removed);
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["manifesthub", "-t", "tok", "-k", "key"]).unwrap();
        assert_eq!(cli.mode, Mode::Download);
        assert_eq!(cli.concurrent_account, 4);
        assert_eq!(cli.concurrent_manifest, 16);
        assert_eq!(cli.index, 0);
        assert_eq!(cli.number, 1);
    }

    #[test]
    fn test_required_flags() {
        assert!(Cli::try_parse_from(["manifesthub"]).is_err());
        assert!(Cli::try_parse_from(["manifesthub", "-t", "tok"]).is_err());
        assert!(Cli::try_parse_from(["manifesthub", "-k", "key"]).is_err());
    }

    #[test]
    fn test_mode_parsing() {
        let cli = Cli::try_parse_from([
            "manifesthub",
            "account",
            "-t",
            "tok",
            "-k",
            "key",
            "-a",
            "accounts.json",
            "-i",
            "1",
            "-n",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.mode, Mode::Account);
        assert_eq!(cli.account, Some(PathBuf::from("accounts.json")));
        assert_eq!(cli.index, 1);
        assert_eq!(cli.number, 2);

        assert!(Cli::try_parse_from(["manifesthub", "upload", "-t", "t", "-k", "k"]).is_err());
    }
}
