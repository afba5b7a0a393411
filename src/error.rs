//! Error taxonomy and the process outcome value.
//!
//! Every component returns [`CliError`] or produces an [`Outcome`]; only
//! `main` turns an outcome into a process exit.

use thiserror::Error;

/// Clean termination.
pub const EXIT_SUCCESS: i32 = 0;
/// Authentication or transport failure (also I/O, archive and HTTP failures).
pub const EXIT_FAILURE: i32 = 1;
/// Missing/invalid project config or bad option combination.
pub const EXIT_CONFIG: i32 = 2;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("connection error: {0}")]
    Transport(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{0}")]
    Usage(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to create archive: {0}")]
    Archive(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Usage(_) => EXIT_CONFIG,
            Self::Transport(_)
            | Self::Auth(_)
            | Self::Io(_)
            | Self::Archive(_)
            | Self::Protocol(_)
            | Self::Http(_) => EXIT_FAILURE,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for CliError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CliError>;

/// Terminal result of one CLI invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure { code: i32, reason: String },
}

impl Outcome {
    pub fn failure(code: i32, reason: impl Into<String>) -> Self {
        Self::Failure {
            code,
            reason: reason.into(),
        }
    }

    /// Exit code 1: transport or authentication failure.
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::failure(EXIT_FAILURE, reason)
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Success => EXIT_SUCCESS,
            Self::Failure { code, .. } => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<CliError> for Outcome {
    fn from(e: CliError) -> Self {
        Self::failure(e.exit_code(), e.to_string())
    }
}
