//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and the exit-code policy: every failure exits with code 1.

use manifesthub::archive::ArchiveError;
use manifesthub::orchestrator::OrchestratorError;
use std::fmt;
use std::process;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Invalid flag combination or malformed flag value
    Config(String),
    /// Failed to open the archive repository
    Repository(ArchiveError),
    /// Failed to build the async runtime
    Runtime(std::io::Error),
    /// The run itself failed
    Run(OrchestratorError),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        // Print additional help for specific errors
        if let CliError::Repository(_) = self {
            eprintln!();
            eprintln!("The harvester must run inside a clone of the archive repository");
            eprintln!("with an 'origin' remote pointing at the forge.");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Repository(e) => write!(f, "Failed to open archive repository: {}", e),
            CliError::Runtime(e) => write!(f, "Failed to start async runtime: {}", e),
            CliError::Run(e) => write!(f, "Run failed: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Repository(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            CliError::Run(e) => Some(e),
            _ => None,
        }
    }
}

impl From<OrchestratorError> for CliError {
    fn from(e: OrchestratorError) -> Self {
        CliError::Run(e)
    }
}
